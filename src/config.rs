//! Session and per-technology ranging configuration.
//!
//! Two layers of configuration exist. [`SessionConfig`] plus the per-technology
//! user parameter records describe what the client *wants*; the selectors
//! (see [`crate::selector`]) narrow them against local and peer capabilities
//! into [`TechnologyConfig`] values, which are the concrete parameters handed
//! to adapters.

use crate::device::{RangingDevice, UwbAddress};
use crate::technology::RangingTechnology;
use crate::{DeviceRole, Error, ErrorKind, Result};

/// Session-wide behavior knobs, independent of any technology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Policy deciding which fresh measurements are surfaced to the listener
    pub notification_config: NotificationConfig,
    /// Whether the client wants azimuth/elevation in addition to distance
    pub angle_of_arrival_needed: bool,
    /// Whether per-peer sensor fusion filters measurements before surfacing
    pub sensor_fusion_enabled: bool,
    /// Stop the session after this many fused measurements; 0 = unlimited
    pub ranging_measurements_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            notification_config: NotificationConfig::enable(),
            angle_of_arrival_needed: false,
            sensor_fusion_enabled: true,
            ranging_measurements_limit: 0,
        }
    }
}

/// When fresh measurements should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// Never surface measurements
    Disable,
    /// Surface every measurement
    Enable,
    /// Surface only measurements inside the `[near, far]` band
    ProximityLevel,
    /// Surface only crossings of the `[near, far]` band edges
    ProximityEdge,
}

/// A data-notification policy with an optional proximity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationConfig {
    kind: NotificationKind,
    near_cm: u32,
    far_cm: u32,
}

impl NotificationConfig {
    /// Creates a policy, validating that `near_cm ≤ far_cm` for the proximity kinds.
    pub fn new(kind: NotificationKind, near_cm: u32, far_cm: u32) -> Result<Self> {
        match kind {
            NotificationKind::ProximityLevel | NotificationKind::ProximityEdge if near_cm > far_cm => Err(Error::new(
                ErrorKind::InvalidParameters,
                format!("proximity band is inverted: near {near_cm} cm > far {far_cm} cm"),
            )),
            _ => Ok(NotificationConfig { kind, near_cm, far_cm }),
        }
    }

    /// A policy surfacing every measurement.
    pub fn enable() -> Self {
        NotificationConfig {
            kind: NotificationKind::Enable,
            near_cm: 0,
            far_cm: 0,
        }
    }

    /// A policy surfacing no measurements.
    pub fn disable() -> Self {
        NotificationConfig {
            kind: NotificationKind::Disable,
            near_cm: 0,
            far_cm: 0,
        }
    }

    /// The notification kind.
    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    /// Near edge of the proximity band, in centimeters.
    pub fn near_cm(&self) -> u32 {
        self.near_cm
    }

    /// Far edge of the proximity band, in centimeters.
    pub fn far_cm(&self) -> u32 {
        self.far_cm
    }
}

/// Which technology subsets the ranging engine may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangingMode {
    /// Only UWB is acceptable; selection fails if UWB cannot be configured
    UwbOnly,
    /// Any non-empty subset of the requested technologies is acceptable
    BestAvailable,
    /// Every requested technology must be configurable for every peer
    AllRequired,
}

/// Negotiated security posture for a technology session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SecurityLevel {
    /// Static-STS style sessions with short provisioned keys
    Basic = 0,
    /// Provisioned-STS sessions with long keys
    Secure = 1,
}

impl TryFrom<u8> for SecurityLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SecurityLevel::Basic),
            1 => Ok(SecurityLevel::Secure),
            _ => Err(Error::malformed(format!("unknown security level {value}"))),
        }
    }
}

/// The three client-facing measurement cadence tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum UpdateRate {
    /// Fastest supported cadence
    Frequent = 1,
    /// Default cadence
    Normal = 2,
    /// Power-saving cadence
    Infrequent = 3,
}

impl TryFrom<u8> for UpdateRate {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(UpdateRate::Frequent),
            2 => Ok(UpdateRate::Normal),
            3 => Ok(UpdateRate::Infrequent),
            _ => Err(Error::malformed(format!("unknown update rate {value}"))),
        }
    }
}

/// An ISO 3166-1 alpha-2 country code, exactly two ASCII uppercase letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CountryCode([u8; 2]);

impl CountryCode {
    /// Validates and wraps a two-letter code.
    pub fn new(bytes: [u8; 2]) -> Result<Self> {
        if bytes.iter().all(|b| b.is_ascii_uppercase()) {
            Ok(CountryCode(bytes))
        } else {
            Err(Error::malformed(format!("not a country code: {bytes:02x?}")))
        }
    }

    /// The raw ASCII bytes.
    pub fn to_bytes(self) -> [u8; 2] {
        self.0
    }
}

impl TryFrom<&str> for CountryCode {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        let bytes: [u8; 2] = value
            .as_bytes()
            .try_into()
            .map_err(|_| Error::malformed(format!("country code must be 2 characters: {value:?}")))?;
        CountryCode::new(bytes)
    }
}

impl std::fmt::Display for CountryCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.0[0] as char, self.0[1] as char)
    }
}

/// FiRa-defined UWB session configuration profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum UwbConfigId {
    /// Unicast DS-TWR
    UnicastDsTwr = 1,
    /// One-to-many DS-TWR
    MulticastDsTwr = 2,
    /// Unicast DS-TWR without angle-of-arrival
    UnicastDsTwrNoAoa = 3,
    /// Unicast DS-TWR with a provisioned STS key
    ProvisionedUnicastDsTwr = 4,
    /// One-to-many DS-TWR with a provisioned STS key
    ProvisionedMulticastDsTwr = 5,
    /// Provisioned unicast DS-TWR without angle-of-arrival
    ProvisionedUnicastDsTwrNoAoa = 6,
    /// Provisioned unicast DS-TWR at the fastest interval the hardware allows
    ProvisionedUnicastDsTwrVeryFast = 7,
}

impl TryFrom<u8> for UwbConfigId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(UwbConfigId::UnicastDsTwr),
            2 => Ok(UwbConfigId::MulticastDsTwr),
            3 => Ok(UwbConfigId::UnicastDsTwrNoAoa),
            4 => Ok(UwbConfigId::ProvisionedUnicastDsTwr),
            5 => Ok(UwbConfigId::ProvisionedMulticastDsTwr),
            6 => Ok(UwbConfigId::ProvisionedUnicastDsTwrNoAoa),
            7 => Ok(UwbConfigId::ProvisionedUnicastDsTwrVeryFast),
            _ => Err(Error::malformed(format!("unknown uwb config id {value}"))),
        }
    }
}

/// Controller/controlee position within a UWB session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UwbDeviceMode {
    /// Schedules the session's ranging rounds
    Controller = 1,
    /// Follows the controller's schedule
    Controlee = 2,
}

impl TryFrom<u8> for UwbDeviceMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(UwbDeviceMode::Controller),
            2 => Ok(UwbDeviceMode::Controlee),
            _ => Err(Error::malformed(format!("unknown uwb device mode {value}"))),
        }
    }
}

/// Concrete negotiated UWB session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UwbRangingParams {
    /// 32-bit UWB session id shared by both ends
    pub session_id: u32,
    /// Selected configuration profile
    pub config_id: UwbConfigId,
    /// Selected UWB channel
    pub channel: u8,
    /// Selected preamble code index
    pub preamble_index: u8,
    /// Negotiated ranging round interval, in milliseconds
    pub ranging_interval_ms: u16,
    /// Negotiated slot duration, in milliseconds
    pub slot_duration_ms: u8,
    /// STS session key, 8, 16, or 32 bytes
    pub session_key: Vec<u8>,
    /// Local short address
    pub local_address: UwbAddress,
    /// Peer short address
    pub peer_address: UwbAddress,
    /// Regulatory country code in effect
    pub country_code: CountryCode,
    /// Controller/controlee mode of the local device
    pub device_mode: UwbDeviceMode,
}

/// Concrete Wi-Fi RTT session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RttRangingParams {
    /// NAN service name both ends publish/subscribe under
    pub service_name: String,
    /// Selected cadence tier
    pub update_rate: UpdateRate,
    /// Whether hardware periodic ranging is in use
    pub periodic: bool,
    /// Concrete measurement period, in milliseconds
    pub interval_ms: u16,
}

/// Location environment hint for Channel Sounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CsLocationType {
    /// Unknown environment
    Unknown = 0,
    /// Indoor environment
    Indoor = 1,
    /// Outdoor environment
    Outdoor = 2,
}

impl TryFrom<u8> for CsLocationType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CsLocationType::Unknown),
            1 => Ok(CsLocationType::Indoor),
            2 => Ok(CsLocationType::Outdoor),
            _ => Err(Error::malformed(format!("unknown cs location type {value}"))),
        }
    }
}

/// Line-of-sight hint for Channel Sounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CsSightType {
    /// Unknown visibility
    Unknown = 0,
    /// Direct line of sight expected
    LineOfSight = 1,
    /// Obstructed path expected
    NonLineOfSight = 2,
}

impl TryFrom<u8> for CsSightType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CsSightType::Unknown),
            1 => Ok(CsSightType::LineOfSight),
            2 => Ok(CsSightType::NonLineOfSight),
            _ => Err(Error::malformed(format!("unknown cs sight type {value}"))),
        }
    }
}

/// Concrete Bluetooth Channel Sounding session parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsRangingParams {
    /// Security posture of the CS procedure
    pub security_level: SecurityLevel,
    /// Environment hint passed to the controller
    pub location_type: CsLocationType,
    /// Visibility hint passed to the controller
    pub sight_type: CsSightType,
}

/// Concrete BLE RSSI session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RssiRangingParams {
    /// GATT service name advertised for the measurement link
    pub service_name: String,
    /// Sampling period, in milliseconds
    pub interval_ms: u16,
}

/// Technology-specific parameter record inside a [`TechnologyConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TechnologyParams {
    /// UWB parameters
    Uwb(UwbRangingParams),
    /// Wi-Fi RTT parameters
    Rtt(RttRangingParams),
    /// Bluetooth Channel Sounding parameters
    Cs(CsRangingParams),
    /// BLE RSSI parameters
    Rssi(RssiRangingParams),
}

impl TechnologyParams {
    /// The technology these parameters configure.
    pub fn technology(&self) -> RangingTechnology {
        match self {
            TechnologyParams::Uwb(_) => RangingTechnology::Uwb,
            TechnologyParams::Rtt(_) => RangingTechnology::Rtt,
            TechnologyParams::Cs(_) => RangingTechnology::Cs,
            TechnologyParams::Rssi(_) => RangingTechnology::Rssi,
        }
    }
}

/// A concrete configuration an adapter can be started with.
///
/// Unicast configs target a single peer; multicast configs share one
/// parameter set across a peer group. Wi-Fi RTT, CS, and RSSI sessions are
/// always unicast; UWB may be either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TechnologyConfig {
    /// A single-peer session
    Unicast {
        /// Role of the local device in the session
        role: DeviceRole,
        /// The one peer
        peer: RangingDevice,
        /// Technology-specific parameters
        params: TechnologyParams,
    },
    /// A shared session across a peer group
    Multicast {
        /// Role of the local device in the session
        role: DeviceRole,
        /// All peers sharing the parameters
        peers: Vec<RangingDevice>,
        /// Technology-specific parameters
        params: TechnologyParams,
    },
}

impl TechnologyConfig {
    /// The technology this config drives.
    pub fn technology(&self) -> RangingTechnology {
        self.params().technology()
    }

    /// The local device's role.
    pub fn role(&self) -> DeviceRole {
        match self {
            TechnologyConfig::Unicast { role, .. } | TechnologyConfig::Multicast { role, .. } => *role,
        }
    }

    /// The peers this config covers (one for unicast).
    pub fn peers(&self) -> Vec<RangingDevice> {
        match self {
            TechnologyConfig::Unicast { peer, .. } => vec![*peer],
            TechnologyConfig::Multicast { peers, .. } => peers.clone(),
        }
    }

    /// The technology-specific parameter record.
    pub fn params(&self) -> &TechnologyParams {
        match self {
            TechnologyConfig::Unicast { params, .. } | TechnologyConfig::Multicast { params, .. } => params,
        }
    }
}

/// Identity of a non-privileged calling app, used by background policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributionSource {
    /// Kernel uid of the calling app
    pub uid: u32,
    /// Package name of the calling app
    pub package_name: String,
}
