//! Local capability discovery.
//!
//! The session core never talks to radio stacks to learn what the device can
//! do; it consumes a [`CapabilitiesProvider`] supplied by the embedder and
//! treats the returned records as ground truth for selection.

use std::collections::BTreeSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::config::{CountryCode, UwbConfigId};
use crate::technology::{RangingTechnology, TechnologySet};
use crate::{DeviceRole, Result};

/// Everything the local device can currently do, per technology.
///
/// A `None` entry means the technology is absent or disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// UWB capabilities, if the device has a UWB controller
    pub uwb: Option<UwbCapabilities>,
    /// Wi-Fi RTT capabilities, if the device supports 802.11mc/az
    pub rtt: Option<RttCapabilities>,
    /// Channel Sounding capabilities, if the BT controller supports CS
    pub cs: Option<CsCapabilities>,
    /// BLE RSSI capabilities
    pub rssi: Option<RssiCapabilities>,
}

impl Capabilities {
    /// The set of technologies with a capability record.
    pub fn supported_technologies(&self) -> TechnologySet {
        let mut set = TechnologySet::new();
        if self.uwb.is_some() {
            set.insert(RangingTechnology::Uwb);
        }
        if self.cs.is_some() {
            set.insert(RangingTechnology::Cs);
        }
        if self.rtt.is_some() {
            set.insert(RangingTechnology::Rtt);
        }
        if self.rssi.is_some() {
            set.insert(RangingTechnology::Rssi);
        }
        set
    }

    /// Whether `tech` has a capability record.
    pub fn supports(&self, tech: RangingTechnology) -> bool {
        match tech {
            RangingTechnology::Uwb => self.uwb.is_some(),
            RangingTechnology::Cs => self.cs.is_some(),
            RangingTechnology::Rtt => self.rtt.is_some(),
            RangingTechnology::Rssi => self.rssi.is_some(),
        }
    }
}

/// What the local UWB controller supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UwbCapabilities {
    /// Usable UWB channels (5 and 9 are the common ones)
    pub supported_channels: BTreeSet<u8>,
    /// Usable preamble code indexes
    pub supported_preamble_indexes: BTreeSet<u8>,
    /// Supported configuration profiles
    pub supported_config_ids: BTreeSet<UwbConfigId>,
    /// Fastest ranging round interval the controller sustains, in milliseconds
    pub min_ranging_interval_ms: u16,
    /// Shortest slot duration the controller sustains, in milliseconds
    pub min_slot_duration_ms: u8,
    /// Roles the controller can take
    pub supported_roles: BTreeSet<DeviceRole>,
    /// Regulatory country code currently in effect
    pub country_code: CountryCode,
    /// Whether UWB ranging may continue while the app is backgrounded
    pub background_ranging_supported: bool,
}

/// What the local Wi-Fi stack supports for RTT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RttCapabilities {
    /// Whether azimuth can be measured during ranging bursts
    pub azimuth_supported: bool,
    /// Whether the hardware can schedule periodic ranging bursts itself
    pub periodic_ranging_supported: bool,
    /// Maximum channel bandwidth index usable for ranging
    pub max_supported_bandwidth: u8,
    /// Maximum receive chains usable for ranging
    pub max_supported_rx_chains: u8,
    /// Fastest measurement period, in milliseconds
    pub min_ranging_interval_ms: u16,
    /// Whether RTT ranging may continue while the app is backgrounded
    pub background_ranging_supported: bool,
}

/// What the local Bluetooth controller supports for Channel Sounding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsCapabilities {
    /// Whether the controller supports secure CS procedures
    pub secure_supported: bool,
    /// Number of antenna paths the controller can sound
    pub max_antenna_paths: u8,
    /// Whether CS ranging may continue while the app is backgrounded
    pub background_ranging_supported: bool,
}

/// What the local BLE stack supports for RSSI ranging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RssiCapabilities {
    /// Whether RSSI ranging may continue while the app is backgrounded
    pub background_ranging_supported: bool,
}

/// A change in a technology's availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AvailabilityEvent {
    /// The technology whose availability changed
    pub technology: RangingTechnology,
    /// Whether it is now available
    pub available: bool,
}

/// Source of the local device's ranging capabilities.
///
/// Implementations typically query the platform radio services once and cache
/// the answer, invalidating on the platform's own change notifications.
#[async_trait]
pub trait CapabilitiesProvider: Send + Sync {
    /// A snapshot of everything the local device currently supports.
    async fn capabilities(&self) -> Result<Capabilities>;

    /// A stream of availability changes, for as long as the provider lives.
    async fn availability_events(&self) -> Result<Pin<Box<dyn Stream<Item = AvailabilityEvent> + Send>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_set_tracks_records() {
        let mut caps = Capabilities::default();
        assert!(caps.supported_technologies().is_empty());
        caps.rtt = Some(RttCapabilities {
            azimuth_supported: false,
            periodic_ranging_supported: false,
            max_supported_bandwidth: 2,
            max_supported_rx_chains: 2,
            min_ranging_interval_ms: 512,
            background_ranging_supported: true,
        });
        caps.rssi = Some(RssiCapabilities::default());
        let set = caps.supported_technologies();
        assert!(set.contains(RangingTechnology::Rtt));
        assert!(set.contains(RangingTechnology::Rssi));
        assert!(!set.contains(RangingTechnology::Uwb));
        assert!(caps.supports(RangingTechnology::Rtt));
        assert!(!caps.supports(RangingTechnology::Cs));
    }
}
