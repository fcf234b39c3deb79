#![warn(missing_docs)]

//! Ranging is a multi-technology peer-to-peer ranging session library for [Rust].
//!
//! It coordinates concurrent distance-measurement sessions between a local
//! device and one or more peers, where measurements may be produced by several
//! independent physical-layer technologies: ultra-wideband ([UWB]) two-way
//! ranging, Wi-Fi round-trip-time ([RTT]), Bluetooth Channel Sounding, and BLE
//! RSSI path loss. The crate owns the technology-independent core: session
//! lifecycle, the out-of-band configuration handshake, per-technology
//! parameter selection, and per-peer sensor fusion. Radio stacks themselves
//! stay outside — the embedder supplies them behind the [`RangingAdapter`]
//! trait, together with an OOB byte transport ([`oob::OobConnection`]), a
//! capability source ([`CapabilitiesProvider`]) and an alarm service
//! ([`session::AlarmScheduler`]).
//!
//! [Rust]: https://www.rust-lang.org/
//! [UWB]: https://www.firaconsortium.org/
//! [RTT]: https://www.wi-fi.org/discover-wi-fi/wi-fi-location
//!
//! # Overview
//!
//! The primary pieces are:
//!
//! - Session control:
//!   - The [session kernel][session::RangingSession], owning adapters, peers,
//!     and the session state machine
//!   - The [adapter contract][RangingAdapter] every technology driver
//!     implements
//!   - Per-peer [sensor fusion][fusion::FusionEngine] combining filtered
//!     measurements from the peer's active technologies
//!   - The [data-notification gate][gate::NotificationGate] deciding which
//!     measurements are surfaced
//! - Configuration negotiation:
//!   - [Wire codecs][oob::message] for the out-of-band control protocol
//!   - The [OOB initiator][oob::OobInitiatorSession] and
//!     [responder][oob::OobResponderSession] driving the handshake
//!   - The [ranging engine][selector::RangingEngine] and its per-technology
//!     [selectors][selector], which narrow capability intersections into
//!     concrete parameters
//!
//! # Asynchronous runtime
//!
//! The session kernel and the OOB drivers run on [Tokio]: adapter events are
//! serialized through a per-session channel, OOB exchanges are bounded by
//! `tokio::time` deadlines, and all session state lives behind a single
//! per-session async mutex.
//!
//! [Tokio]: https://tokio.rs/

mod adapter;
pub mod capabilities;
pub mod config;
mod device;
pub mod error;
pub mod fusion;
pub mod gate;
pub mod oob;
pub mod selector;
pub mod session;
mod technology;
mod util;

pub use adapter::{AdapterEvent, AdapterEventSender, AdapterFactory, AdapterId, RangingAdapter};
pub use capabilities::CapabilitiesProvider;
pub use config::{NotificationConfig, SessionConfig, TechnologyConfig};
pub use device::{RangingDevice, UwbAddress};
pub use error::{ClosedReason, Error, ErrorKind, SessionClosedReason};
pub use technology::{RangingTechnology, TechnologySet};
pub use uuid::Uuid;

/// Convenience alias for a result with [`Error`]
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The local device's position in a ranging exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DeviceRole {
    /// Starts the exchange and drives configuration
    Initiator = 0x01,
    /// Answers an initiator
    Responder = 0x02,
}

impl DeviceRole {
    /// The opposite role.
    pub fn flipped(self) -> DeviceRole {
        match self {
            DeviceRole::Initiator => DeviceRole::Responder,
            DeviceRole::Responder => DeviceRole::Initiator,
        }
    }
}

impl TryFrom<u8> for DeviceRole {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(DeviceRole::Initiator),
            0x02 => Ok(DeviceRole::Responder),
            _ => Err(Error::malformed(format!("unknown device role {value:#04x}"))),
        }
    }
}

/// How much a measured value should be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    /// Low confidence
    Low,
    /// Medium confidence
    Medium,
    /// High confidence
    High,
}

/// A single measured quantity with its confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// The measured value; meters for distances, degrees for angles
    pub value: f64,
    /// How much the producing technology trusts the value
    pub confidence: Confidence,
}

impl Measurement {
    /// Creates a measurement.
    pub fn new(value: f64, confidence: Confidence) -> Self {
        Measurement { value, confidence }
    }
}

/// One ranging result for a peer, as produced by an adapter or the fusion
/// pipeline.
///
/// `distance` is always present. `azimuth` and `elevation` are present only
/// when the producing technology measures angle of arrival and the session
/// asked for it.
#[derive(Debug, Clone, PartialEq)]
pub struct RangingData {
    /// Technology that produced the measurement
    pub technology: RangingTechnology,
    /// Capture time in milliseconds since the session's time origin
    pub timestamp_ms: u64,
    /// Line-of-sight distance to the peer, in meters
    pub distance: Measurement,
    /// Horizontal angle of arrival, in degrees
    pub azimuth: Option<Measurement>,
    /// Vertical angle of arrival, in degrees
    pub elevation: Option<Measurement>,
    /// Received signal strength, in dBm
    pub rssi_dbm: Option<i16>,
}

impl RangingData {
    /// Creates a distance-only result.
    pub fn distance_only(technology: RangingTechnology, timestamp_ms: u64, distance: Measurement) -> Self {
        RangingData {
            technology,
            timestamp_ms,
            distance,
            azimuth: None,
            elevation: None,
            rssi_dbm: None,
        }
    }
}
