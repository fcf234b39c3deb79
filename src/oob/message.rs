//! Wire codecs for the out-of-band control protocol.
//!
//! Every message starts with a two-byte [`OobHeader`]. Technology-scoped
//! payloads inside capability-response and set-configuration messages are
//! each introduced by a [`TechnologyHeader`] whose `size` counts the whole
//! block, header included. All multi-byte integers are big-endian.
//!
//! Parsers are strict: a declared size that disagrees with the bytes present,
//! an unknown enum value, or a trailing byte all fail with
//! [`MalformedMessage`](crate::ErrorKind::MalformedMessage) and never parse
//! partially. The one permitted looseness is bitmap fields, where bits with
//! no assigned meaning are ignored on read so that newer peers remain
//! parseable. Codecs perform no I/O.

use std::collections::BTreeSet;

use byteorder::{BigEndian, ByteOrder};

use crate::config::{CountryCode, CsLocationType, CsSightType, SecurityLevel, UpdateRate, UwbConfigId, UwbDeviceMode};
use crate::device::UwbAddress;
use crate::technology::{RangingTechnology, TechnologySet};
use crate::{DeviceRole, Error, Result};

/// Version byte carried in every message header.
pub const PROTOCOL_VERSION: u8 = 1;

macro_rules! require_len {
    ($bytes:expr, $len:expr, $what:expr) => {
        if $bytes.len() != $len {
            return Err(Error::malformed(format!(
                "{} must be {} bytes, got {}",
                $what,
                $len,
                $bytes.len()
            )));
        }
    };
}

macro_rules! require_len_at_least {
    ($bytes:expr, $len:expr, $what:expr) => {
        if $bytes.len() < $len {
            return Err(Error::malformed(format!(
                "{} must be at least {} bytes, got {}",
                $what,
                $len,
                $bytes.len()
            )));
        }
    };
}

/// The message types of the OOB protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Initiator asks a peer which technologies it supports
    CapabilityRequest = 1,
    /// Peer answers with capabilities per technology
    CapabilityResponse = 2,
    /// Initiator distributes the selected configuration
    SetConfiguration = 3,
    /// Initiator starts ranging on a set of technologies
    StartRanging = 4,
    /// Either side stops ranging on a set of technologies
    StopRanging = 5,
    /// Acknowledgement bitmap for a configuration or stop
    StatusResponse = 6,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(MessageType::CapabilityRequest),
            2 => Ok(MessageType::CapabilityResponse),
            3 => Ok(MessageType::SetConfiguration),
            4 => Ok(MessageType::StartRanging),
            5 => Ok(MessageType::StopRanging),
            6 => Ok(MessageType::StatusResponse),
            _ => Err(Error::malformed(format!("unknown message type {value}"))),
        }
    }
}

/// The two-byte envelope at the start of every OOB message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OobHeader {
    /// What kind of message follows
    pub message_type: MessageType,
    /// Protocol version, currently [`PROTOCOL_VERSION`]
    pub version: u8,
}

impl OobHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 2;

    fn new(message_type: MessageType) -> Self {
        OobHeader {
            message_type,
            version: PROTOCOL_VERSION,
        }
    }

    /// Parses the header from the front of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        require_len_at_least!(bytes, Self::SIZE, "oob header");
        let message_type = MessageType::try_from(bytes[0])?;
        let version = bytes[1];
        if version != PROTOCOL_VERSION {
            return Err(Error::malformed(format!("unsupported protocol version {version}")));
        }
        Ok(OobHeader { message_type, version })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.message_type as u8);
        out.push(self.version);
    }
}

/// Introduces one technology-scoped block inside a larger message.
///
/// `size` counts the entire block: these two header bytes plus the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TechnologyHeader {
    /// The technology the following payload configures or describes
    pub technology: RangingTechnology,
    /// Total block size in bytes, header included
    pub size: u8,
}

impl TechnologyHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 2;

    fn parse(bytes: &[u8]) -> Result<Self> {
        require_len_at_least!(bytes, Self::SIZE, "technology header");
        let technology = RangingTechnology::try_from(bytes[0])?;
        let size = bytes[1];
        if usize::from(size) < Self::SIZE {
            return Err(Error::malformed(format!("technology block size {size} is impossible")));
        }
        Ok(TechnologyHeader { technology, size })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.technology as u8);
        out.push(self.size);
    }
}

// Shifted bitmap helpers shared by the capability payloads. `shift` is the
// value encoded by bit 0.
fn parse_shifted_bitmap(bits: u32, shift: u8) -> BTreeSet<u8> {
    (0..32).filter(|n| bits & (1 << n) != 0).map(|n| n as u8 + shift).collect()
}

fn to_shifted_bitmap(values: impl Iterator<Item = u8>, shift: u8) -> u32 {
    values
        .filter(|v| (shift..shift + 32).contains(v))
        .fold(0u32, |bits, v| bits | 1 << (v - shift))
}

/// `CAPABILITY_REQUEST` — the technologies the initiator wants to range over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRequestMessage {
    /// Requested technologies
    pub requested: TechnologySet,
}

impl CapabilityRequestMessage {
    /// Serializes the message, header included.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OobHeader::SIZE + 1);
        OobHeader::new(MessageType::CapabilityRequest).write(&mut out);
        out.extend_from_slice(&self.requested.to_bitmap(1));
        out
    }

    fn parse_body(body: &[u8]) -> Result<Self> {
        require_len!(body, 1, "capability request body");
        Ok(CapabilityRequestMessage {
            requested: TechnologySet::parse_bitmap(body)?,
        })
    }
}

/// UWB capability report inside a [`CapabilityResponseMessage`].
///
/// Wire layout after the [`TechnologyHeader`] (18 bytes): address\[2\],
/// channels bitmap\[4\] (bit N = channel N), preamble bitmap\[4\]
/// (bit N = index N+1), config-id bitmap\[4\] (bit N = id N),
/// min ranging interval\[2\], min slot duration\[1\], role bitmap\[1\]
/// (bit N = role N+1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UwbOobCapabilities {
    /// The peer's UWB short address
    pub address: UwbAddress,
    /// Channels the peer can use
    pub supported_channels: BTreeSet<u8>,
    /// Preamble code indexes the peer can use
    pub supported_preamble_indexes: BTreeSet<u8>,
    /// Configuration profiles the peer can use
    pub supported_config_ids: BTreeSet<UwbConfigId>,
    /// Fastest ranging interval the peer sustains, in milliseconds
    pub min_ranging_interval_ms: u16,
    /// Shortest slot duration the peer sustains, in milliseconds
    pub min_slot_duration_ms: u8,
    /// Roles the peer can take
    pub supported_roles: BTreeSet<DeviceRole>,
}

impl UwbOobCapabilities {
    const PAYLOAD_SIZE: usize = 18;
    const BLOCK_SIZE: usize = TechnologyHeader::SIZE + Self::PAYLOAD_SIZE;

    fn write_block(&self, out: &mut Vec<u8>) {
        TechnologyHeader {
            technology: RangingTechnology::Uwb,
            size: Self::BLOCK_SIZE as u8,
        }
        .write(out);
        out.extend_from_slice(&self.address.to_bytes());
        out.extend_from_slice(&to_shifted_bitmap(self.supported_channels.iter().copied(), 0).to_be_bytes());
        out.extend_from_slice(&to_shifted_bitmap(self.supported_preamble_indexes.iter().copied(), 1).to_be_bytes());
        out.extend_from_slice(
            &to_shifted_bitmap(self.supported_config_ids.iter().map(|id| *id as u8), 0).to_be_bytes(),
        );
        out.extend_from_slice(&self.min_ranging_interval_ms.to_be_bytes());
        out.push(self.min_slot_duration_ms);
        out.push(to_shifted_bitmap(self.supported_roles.iter().map(|r| *r as u8), 1) as u8);
    }

    fn parse_payload(payload: &[u8]) -> Result<Self> {
        require_len!(payload, Self::PAYLOAD_SIZE, "uwb capability payload");
        let address = UwbAddress::new([payload[0], payload[1]]);
        let supported_channels = parse_shifted_bitmap(BigEndian::read_u32(&payload[2..6]), 0);
        let supported_preamble_indexes = parse_shifted_bitmap(BigEndian::read_u32(&payload[6..10]), 1);
        // Config-id bits with no assigned profile are ignored, like unknown
        // technology bits.
        let supported_config_ids = parse_shifted_bitmap(BigEndian::read_u32(&payload[10..14]), 0)
            .into_iter()
            .filter_map(|id| UwbConfigId::try_from(id).ok())
            .collect();
        let min_ranging_interval_ms = BigEndian::read_u16(&payload[14..16]);
        let min_slot_duration_ms = payload[16];
        let supported_roles = parse_shifted_bitmap(u32::from(payload[17]), 1)
            .into_iter()
            .filter_map(|role| DeviceRole::try_from(role).ok())
            .collect();
        Ok(UwbOobCapabilities {
            address,
            supported_channels,
            supported_preamble_indexes,
            supported_config_ids,
            min_ranging_interval_ms,
            min_slot_duration_ms,
            supported_roles,
        })
    }
}

/// Wi-Fi RTT capability report inside a [`CapabilityResponseMessage`].
///
/// Wire layout after the header (4 bytes): features\[1\] (bit 0 = azimuth
/// measurement supported), periodic ranging support\[1\], max bandwidth\[1\],
/// max rx chains\[1\].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttOobCapabilities {
    /// Whether the peer can measure azimuth during RTT bursts
    pub azimuth_supported: bool,
    /// Whether the peer's hardware can schedule periodic ranging itself
    pub periodic_ranging_supported: bool,
    /// Maximum channel bandwidth index
    pub max_supported_bandwidth: u8,
    /// Maximum receive chains
    pub max_supported_rx_chains: u8,
}

impl RttOobCapabilities {
    const PAYLOAD_SIZE: usize = 4;
    const BLOCK_SIZE: usize = TechnologyHeader::SIZE + Self::PAYLOAD_SIZE;

    fn write_block(&self, out: &mut Vec<u8>) {
        TechnologyHeader {
            technology: RangingTechnology::Rtt,
            size: Self::BLOCK_SIZE as u8,
        }
        .write(out);
        out.push(u8::from(self.azimuth_supported));
        out.push(u8::from(self.periodic_ranging_supported));
        out.push(self.max_supported_bandwidth);
        out.push(self.max_supported_rx_chains);
    }

    fn parse_payload(payload: &[u8]) -> Result<Self> {
        require_len!(payload, Self::PAYLOAD_SIZE, "rtt capability payload");
        Ok(RttOobCapabilities {
            azimuth_supported: parse_bool(payload[0], "rtt features")?,
            periodic_ranging_supported: parse_bool(payload[1], "rtt periodic ranging support")?,
            max_supported_bandwidth: payload[2],
            max_supported_rx_chains: payload[3],
        })
    }
}

/// Channel Sounding capability report inside a [`CapabilityResponseMessage`].
///
/// Wire layout after the header (2 bytes): features\[1\] (bit 0 = secure
/// sessions supported), max antenna paths\[1\].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsOobCapabilities {
    /// Whether the peer supports [`SecurityLevel::Secure`] CS procedures
    pub secure_supported: bool,
    /// Number of antenna paths the peer can sound
    pub max_antenna_paths: u8,
}

impl CsOobCapabilities {
    const PAYLOAD_SIZE: usize = 2;
    const BLOCK_SIZE: usize = TechnologyHeader::SIZE + Self::PAYLOAD_SIZE;

    fn write_block(&self, out: &mut Vec<u8>) {
        TechnologyHeader {
            technology: RangingTechnology::Cs,
            size: Self::BLOCK_SIZE as u8,
        }
        .write(out);
        out.push(u8::from(self.secure_supported));
        out.push(self.max_antenna_paths);
    }

    fn parse_payload(payload: &[u8]) -> Result<Self> {
        require_len!(payload, Self::PAYLOAD_SIZE, "cs capability payload");
        Ok(CsOobCapabilities {
            secure_supported: parse_bool(payload[0], "cs features")?,
            max_antenna_paths: payload[1],
        })
    }
}

/// BLE RSSI capability report inside a [`CapabilityResponseMessage`].
///
/// Wire layout after the header (1 byte): a reserved features byte that must
/// currently be zero. Presence of the block is the capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RssiOobCapabilities;

impl RssiOobCapabilities {
    const PAYLOAD_SIZE: usize = 1;
    const BLOCK_SIZE: usize = TechnologyHeader::SIZE + Self::PAYLOAD_SIZE;

    fn write_block(&self, out: &mut Vec<u8>) {
        TechnologyHeader {
            technology: RangingTechnology::Rssi,
            size: Self::BLOCK_SIZE as u8,
        }
        .write(out);
        out.push(0);
    }

    fn parse_payload(payload: &[u8]) -> Result<Self> {
        require_len!(payload, Self::PAYLOAD_SIZE, "rssi capability payload");
        if payload[0] != 0 {
            return Err(Error::malformed(format!("reserved rssi features byte {:#04x}", payload[0])));
        }
        Ok(RssiOobCapabilities)
    }
}

/// `CAPABILITY_RESPONSE` — a peer's per-technology capability report.
///
/// The supported-technology bitmap on the wire is derived from the payload
/// blocks present; the parser rejects a bitmap that disagrees with the
/// blocks that follow it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityResponseMessage {
    /// The peer's technology preference, most preferred first
    pub priority: Vec<RangingTechnology>,
    /// UWB capabilities, when the peer supports UWB
    pub uwb: Option<UwbOobCapabilities>,
    /// RTT capabilities, when the peer supports RTT
    pub rtt: Option<RttOobCapabilities>,
    /// CS capabilities, when the peer supports CS
    pub cs: Option<CsOobCapabilities>,
    /// RSSI capabilities, when the peer supports RSSI
    pub rssi: Option<RssiOobCapabilities>,
}

impl CapabilityResponseMessage {
    /// The technologies this response carries capabilities for.
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

    /// Serializes the message, header included.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        OobHeader::new(MessageType::CapabilityResponse).write(&mut out);
        out.extend_from_slice(&self.supported_technologies().to_bitmap(2));
        out.push(self.priority.len() as u8);
        out.extend(self.priority.iter().map(|t| *t as u8));
        if let Some(uwb) = &self.uwb {
            uwb.write_block(&mut out);
        }
        if let Some(cs) = &self.cs {
            cs.write_block(&mut out);
        }
        if let Some(rtt) = &self.rtt {
            rtt.write_block(&mut out);
        }
        if let Some(rssi) = &self.rssi {
            rssi.write_block(&mut out);
        }
        out
    }

    fn parse_body(body: &[u8]) -> Result<Self> {
        require_len_at_least!(body, 3, "capability response body");
        let supported = TechnologySet::parse_bitmap(&body[0..2])?;
        let priority_len = usize::from(body[2]);
        let rest = &body[3..];
        require_len_at_least!(rest, priority_len, "capability response priority list");
        let priority = rest[..priority_len]
            .iter()
            .map(|&id| RangingTechnology::try_from(id))
            .collect::<Result<Vec<_>>>()?;

        let mut message = CapabilityResponseMessage {
            priority,
            ..Default::default()
        };
        for block in TechnologyBlocks::new(&rest[priority_len..]) {
            let (technology, payload) = block?;
            match technology {
                RangingTechnology::Uwb => {
                    replace_none(&mut message.uwb, UwbOobCapabilities::parse_payload(payload)?, technology)?
                }
                RangingTechnology::Rtt => {
                    replace_none(&mut message.rtt, RttOobCapabilities::parse_payload(payload)?, technology)?
                }
                RangingTechnology::Cs => {
                    replace_none(&mut message.cs, CsOobCapabilities::parse_payload(payload)?, technology)?
                }
                RangingTechnology::Rssi => {
                    replace_none(&mut message.rssi, RssiOobCapabilities::parse_payload(payload)?, technology)?
                }
            }
        }
        if message.supported_technologies() != supported {
            return Err(Error::malformed(format!(
                "capability bitmap {supported} does not match payloads {}",
                message.supported_technologies()
            )));
        }
        Ok(message)
    }
}

/// UWB configuration inside a [`SetConfigurationMessage`].
///
/// `device_role` and `device_mode` are the role and mode the *receiving*
/// device should adopt. Wire layout after the header (17 bytes + key):
/// sender address\[2\], session id\[4\], config id\[1\], channel\[1\],
/// preamble index\[1\], ranging interval\[2\], slot duration\[1\],
/// key length\[1\], key, country code\[2\], device role\[1\], device mode\[1\].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UwbOobConfig {
    /// Short address of the sending device
    pub sender_address: UwbAddress,
    /// Shared 32-bit session id
    pub session_id: u32,
    /// Selected configuration profile
    pub config_id: UwbConfigId,
    /// Selected channel
    pub channel: u8,
    /// Selected preamble code index
    pub preamble_index: u8,
    /// Selected ranging round interval, in milliseconds
    pub ranging_interval_ms: u16,
    /// Selected slot duration, in milliseconds
    pub slot_duration_ms: u8,
    /// STS session key; must be 8, 16, or 32 bytes
    pub session_key: Vec<u8>,
    /// Regulatory country code in effect at the sender
    pub country_code: CountryCode,
    /// Role the receiving device should adopt
    pub device_role: DeviceRole,
    /// Controller/controlee mode the receiving device should adopt
    pub device_mode: UwbDeviceMode,
}

impl UwbOobConfig {
    const FIXED_PAYLOAD_SIZE: usize = 17;

    fn write_block(&self, out: &mut Vec<u8>) {
        TechnologyHeader {
            technology: RangingTechnology::Uwb,
            size: (TechnologyHeader::SIZE + Self::FIXED_PAYLOAD_SIZE + self.session_key.len()) as u8,
        }
        .write(out);
        out.extend_from_slice(&self.sender_address.to_bytes());
        out.extend_from_slice(&self.session_id.to_be_bytes());
        out.push(self.config_id as u8);
        out.push(self.channel);
        out.push(self.preamble_index);
        out.extend_from_slice(&self.ranging_interval_ms.to_be_bytes());
        out.push(self.slot_duration_ms);
        out.push(self.session_key.len() as u8);
        out.extend_from_slice(&self.session_key);
        out.extend_from_slice(&self.country_code.to_bytes());
        out.push(self.device_role as u8);
        out.push(self.device_mode as u8);
    }

    fn parse_payload(payload: &[u8]) -> Result<Self> {
        require_len_at_least!(payload, Self::FIXED_PAYLOAD_SIZE, "uwb config payload");
        let sender_address = UwbAddress::new([payload[0], payload[1]]);
        let session_id = BigEndian::read_u32(&payload[2..6]);
        let config_id = UwbConfigId::try_from(payload[6])?;
        let channel = payload[7];
        let preamble_index = payload[8];
        let ranging_interval_ms = BigEndian::read_u16(&payload[9..11]);
        let slot_duration_ms = payload[11];
        let key_len = usize::from(payload[12]);
        if !matches!(key_len, 8 | 16 | 32) {
            return Err(Error::malformed(format!("uwb session key length {key_len}")));
        }
        require_len!(payload, Self::FIXED_PAYLOAD_SIZE + key_len, "uwb config payload");
        let session_key = payload[13..13 + key_len].to_vec();
        let tail = &payload[13 + key_len..];
        let country_code = CountryCode::new([tail[0], tail[1]])?;
        let device_role = DeviceRole::try_from(tail[2])?;
        let device_mode = UwbDeviceMode::try_from(tail[3])?;
        Ok(UwbOobConfig {
            sender_address,
            session_id,
            config_id,
            channel,
            preamble_index,
            ranging_interval_ms,
            slot_duration_ms,
            session_key,
            country_code,
            device_role,
            device_mode,
        })
    }
}

/// Wi-Fi RTT configuration inside a [`SetConfigurationMessage`].
///
/// Wire layout after the header: name length\[1\], service name (UTF-8),
/// update rate\[1\], interval\[2\]. The block size is always
/// `service name length + 6`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RttOobConfig {
    /// NAN service name both ends rendezvous under
    pub service_name: String,
    /// Selected cadence tier
    pub update_rate: UpdateRate,
    /// Concrete measurement period, in milliseconds
    pub interval_ms: u16,
}

impl RttOobConfig {
    fn block_size(&self) -> usize {
        self.service_name.len() + 6
    }

    fn write_block(&self, out: &mut Vec<u8>) {
        TechnologyHeader {
            technology: RangingTechnology::Rtt,
            size: self.block_size() as u8,
        }
        .write(out);
        out.push(self.service_name.len() as u8);
        out.extend_from_slice(self.service_name.as_bytes());
        out.push(self.update_rate as u8);
        out.extend_from_slice(&self.interval_ms.to_be_bytes());
    }

    fn parse_payload(payload: &[u8]) -> Result<Self> {
        require_len_at_least!(payload, 4, "rtt config payload");
        let name_len = usize::from(payload[0]);
        require_len!(payload, name_len + 4, "rtt config payload");
        let service_name = String::from_utf8(payload[1..1 + name_len].to_vec())
            .map_err(|_| Error::malformed("rtt service name is not utf-8"))?;
        let update_rate = UpdateRate::try_from(payload[1 + name_len])?;
        let interval_ms = BigEndian::read_u16(&payload[2 + name_len..4 + name_len]);
        Ok(RttOobConfig {
            service_name,
            update_rate,
            interval_ms,
        })
    }
}

/// Channel Sounding configuration inside a [`SetConfigurationMessage`].
///
/// Wire layout after the header (3 bytes): security level\[1\],
/// location type\[1\], sight type\[1\].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsOobConfig {
    /// Security posture of the CS procedure
    pub security_level: SecurityLevel,
    /// Environment hint
    pub location_type: CsLocationType,
    /// Visibility hint
    pub sight_type: CsSightType,
}

impl CsOobConfig {
    const PAYLOAD_SIZE: usize = 3;
    const BLOCK_SIZE: usize = TechnologyHeader::SIZE + Self::PAYLOAD_SIZE;

    fn write_block(&self, out: &mut Vec<u8>) {
        TechnologyHeader {
            technology: RangingTechnology::Cs,
            size: Self::BLOCK_SIZE as u8,
        }
        .write(out);
        out.push(self.security_level as u8);
        out.push(self.location_type as u8);
        out.push(self.sight_type as u8);
    }

    fn parse_payload(payload: &[u8]) -> Result<Self> {
        require_len!(payload, Self::PAYLOAD_SIZE, "cs config payload");
        Ok(CsOobConfig {
            security_level: SecurityLevel::try_from(payload[0])?,
            location_type: CsLocationType::try_from(payload[1])?,
            sight_type: CsSightType::try_from(payload[2])?,
        })
    }
}

/// BLE RSSI configuration inside a [`SetConfigurationMessage`].
///
/// Wire layout after the header: name length\[1\], service name (UTF-8),
/// interval\[2\].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RssiOobConfig {
    /// GATT service name for the measurement link
    pub service_name: String,
    /// Sampling period, in milliseconds
    pub interval_ms: u16,
}

impl RssiOobConfig {
    fn write_block(&self, out: &mut Vec<u8>) {
        TechnologyHeader {
            technology: RangingTechnology::Rssi,
            size: (TechnologyHeader::SIZE + 3 + self.service_name.len()) as u8,
        }
        .write(out);
        out.push(self.service_name.len() as u8);
        out.extend_from_slice(self.service_name.as_bytes());
        out.extend_from_slice(&self.interval_ms.to_be_bytes());
    }

    fn parse_payload(payload: &[u8]) -> Result<Self> {
        require_len_at_least!(payload, 3, "rssi config payload");
        let name_len = usize::from(payload[0]);
        require_len!(payload, name_len + 3, "rssi config payload");
        let service_name = String::from_utf8(payload[1..1 + name_len].to_vec())
            .map_err(|_| Error::malformed("rssi service name is not utf-8"))?;
        let interval_ms = BigEndian::read_u16(&payload[1 + name_len..3 + name_len]);
        Ok(RssiOobConfig {
            service_name,
            interval_ms,
        })
    }
}

/// `SET_CONFIGURATION` — the initiator's selected configuration for one peer.
///
/// The technology bitmap on the wire is derived from the config blocks
/// present. `start_ranging` names the subset the peer should start
/// immediately on receipt rather than waiting for a `START_RANGING` message;
/// it must be a subset of the configured technologies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetConfigurationMessage {
    /// Technologies the peer should start immediately
    pub start_ranging: TechnologySet,
    /// UWB configuration, when UWB was selected
    pub uwb_config: Option<UwbOobConfig>,
    /// RTT configuration, when RTT was selected
    pub rtt_config: Option<RttOobConfig>,
    /// CS configuration, when CS was selected
    pub cs_config: Option<CsOobConfig>,
    /// RSSI configuration, when RSSI was selected
    pub rssi_config: Option<RssiOobConfig>,
}

impl SetConfigurationMessage {
    /// The technologies this message carries configuration for.
    pub fn technologies(&self) -> TechnologySet {
        let mut set = TechnologySet::new();
        if self.uwb_config.is_some() {
            set.insert(RangingTechnology::Uwb);
        }
        if self.cs_config.is_some() {
            set.insert(RangingTechnology::Cs);
        }
        if self.rtt_config.is_some() {
            set.insert(RangingTechnology::Rtt);
        }
        if self.rssi_config.is_some() {
            set.insert(RangingTechnology::Rssi);
        }
        set
    }

    /// Serializes the message, header included.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        OobHeader::new(MessageType::SetConfiguration).write(&mut out);
        out.extend_from_slice(&self.technologies().to_bitmap(2));
        out.extend_from_slice(&self.start_ranging.to_bitmap(2));
        if let Some(uwb) = &self.uwb_config {
            uwb.write_block(&mut out);
        }
        if let Some(cs) = &self.cs_config {
            cs.write_block(&mut out);
        }
        if let Some(rtt) = &self.rtt_config {
            rtt.write_block(&mut out);
        }
        if let Some(rssi) = &self.rssi_config {
            rssi.write_block(&mut out);
        }
        out
    }

    fn parse_body(body: &[u8]) -> Result<Self> {
        require_len_at_least!(body, 4, "set configuration body");
        let technologies = TechnologySet::parse_bitmap(&body[0..2])?;
        let start_ranging = TechnologySet::parse_bitmap(&body[2..4])?;

        let mut message = SetConfigurationMessage {
            start_ranging,
            ..Default::default()
        };
        for block in TechnologyBlocks::new(&body[4..]) {
            let (technology, payload) = block?;
            match technology {
                RangingTechnology::Uwb => {
                    replace_none(&mut message.uwb_config, UwbOobConfig::parse_payload(payload)?, technology)?
                }
                RangingTechnology::Rtt => {
                    replace_none(&mut message.rtt_config, RttOobConfig::parse_payload(payload)?, technology)?
                }
                RangingTechnology::Cs => {
                    replace_none(&mut message.cs_config, CsOobConfig::parse_payload(payload)?, technology)?
                }
                RangingTechnology::Rssi => {
                    replace_none(&mut message.rssi_config, RssiOobConfig::parse_payload(payload)?, technology)?
                }
            }
        }
        if message.technologies() != technologies {
            return Err(Error::malformed(format!(
                "configured bitmap {technologies} does not match payloads {}",
                message.technologies()
            )));
        }
        for tech in message.start_ranging.iter() {
            if !technologies.contains(tech) {
                return Err(Error::malformed(format!("start-ranging names unconfigured {tech}")));
            }
        }
        Ok(message)
    }
}

/// `START_RANGING` — begin ranging on the named technologies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRangingMessage {
    /// Technologies to start
    pub technologies: TechnologySet,
}

impl StartRangingMessage {
    /// Serializes the message, header included.
    pub fn serialize(&self) -> Vec<u8> {
        serialize_bitmap_message(MessageType::StartRanging, &self.technologies)
    }

    fn parse_body(body: &[u8]) -> Result<Self> {
        require_len!(body, 2, "start ranging body");
        Ok(StartRangingMessage {
            technologies: TechnologySet::parse_bitmap(body)?,
        })
    }
}

/// `STOP_RANGING` — stop ranging on the named technologies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRangingMessage {
    /// Technologies to stop
    pub technologies: TechnologySet,
}

impl StopRangingMessage {
    /// Serializes the message, header included.
    pub fn serialize(&self) -> Vec<u8> {
        serialize_bitmap_message(MessageType::StopRanging, &self.technologies)
    }

    fn parse_body(body: &[u8]) -> Result<Self> {
        require_len!(body, 2, "stop ranging body");
        Ok(StopRangingMessage {
            technologies: TechnologySet::parse_bitmap(body)?,
        })
    }
}

/// `STATUS_RESPONSE` — per-technology success bitmap acknowledging a
/// configuration or stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponseMessage {
    /// Technologies for which the operation succeeded
    pub successes: TechnologySet,
}

impl StatusResponseMessage {
    /// Serializes the message, header included.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OobHeader::SIZE + 1);
        OobHeader::new(MessageType::StatusResponse).write(&mut out);
        out.extend_from_slice(&self.successes.to_bitmap(1));
        out
    }

    fn parse_body(body: &[u8]) -> Result<Self> {
        require_len!(body, 1, "status response body");
        Ok(StatusResponseMessage {
            successes: TechnologySet::parse_bitmap(body)?,
        })
    }
}

/// Any OOB message, as parsed off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OobMessage {
    /// A capability request
    CapabilityRequest(CapabilityRequestMessage),
    /// A capability response
    CapabilityResponse(CapabilityResponseMessage),
    /// A set-configuration command
    SetConfiguration(SetConfigurationMessage),
    /// A start-ranging command
    StartRanging(StartRangingMessage),
    /// A stop-ranging command
    StopRanging(StopRangingMessage),
    /// A status acknowledgement
    StatusResponse(StatusResponseMessage),
}

impl OobMessage {
    /// Parses a complete framed message.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = OobHeader::parse(bytes)?;
        let body = &bytes[OobHeader::SIZE..];
        match header.message_type {
            MessageType::CapabilityRequest => {
                CapabilityRequestMessage::parse_body(body).map(OobMessage::CapabilityRequest)
            }
            MessageType::CapabilityResponse => {
                CapabilityResponseMessage::parse_body(body).map(OobMessage::CapabilityResponse)
            }
            MessageType::SetConfiguration => {
                SetConfigurationMessage::parse_body(body).map(OobMessage::SetConfiguration)
            }
            MessageType::StartRanging => StartRangingMessage::parse_body(body).map(OobMessage::StartRanging),
            MessageType::StopRanging => StopRangingMessage::parse_body(body).map(OobMessage::StopRanging),
            MessageType::StatusResponse => StatusResponseMessage::parse_body(body).map(OobMessage::StatusResponse),
        }
    }

    /// Serializes the message, header included.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            OobMessage::CapabilityRequest(m) => m.serialize(),
            OobMessage::CapabilityResponse(m) => m.serialize(),
            OobMessage::SetConfiguration(m) => m.serialize(),
            OobMessage::StartRanging(m) => m.serialize(),
            OobMessage::StopRanging(m) => m.serialize(),
            OobMessage::StatusResponse(m) => m.serialize(),
        }
    }
}

fn serialize_bitmap_message(message_type: MessageType, set: &TechnologySet) -> Vec<u8> {
    let mut out = Vec::with_capacity(OobHeader::SIZE + 2);
    OobHeader::new(message_type).write(&mut out);
    out.extend_from_slice(&set.to_bitmap(2));
    out
}

fn parse_bool(byte: u8, what: &str) -> Result<bool> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::malformed(format!("{what} byte {byte:#04x} is not a boolean"))),
    }
}

fn replace_none<T>(slot: &mut Option<T>, value: T, technology: RangingTechnology) -> Result<()> {
    if slot.replace(value).is_some() {
        return Err(Error::malformed(format!("duplicate {technology} block")));
    }
    Ok(())
}

/// Iterates `TechnologyHeader`-introduced blocks in a message tail, yielding
/// each block's technology and payload slice. Size errors surface as `Err`
/// items and end the iteration.
struct TechnologyBlocks<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> TechnologyBlocks<'a> {
    fn new(rest: &'a [u8]) -> Self {
        TechnologyBlocks { rest, failed: false }
    }
}

impl<'a> Iterator for TechnologyBlocks<'a> {
    type Item = Result<(RangingTechnology, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        let header = match TechnologyHeader::parse(self.rest) {
            Ok(header) => header,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };
        let block_len = usize::from(header.size);
        if self.rest.len() < block_len {
            self.failed = true;
            return Some(Err(Error::malformed(format!(
                "{} block declares {} bytes but only {} remain",
                header.technology,
                block_len,
                self.rest.len()
            ))));
        }
        let payload = &self.rest[TechnologyHeader::SIZE..block_len];
        self.rest = &self.rest[block_len..];
        Some(Ok((header.technology, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uwb_caps() -> UwbOobCapabilities {
        UwbOobCapabilities {
            address: UwbAddress::new([0x12, 0x34]),
            supported_channels: [5, 9].into(),
            supported_preamble_indexes: [11, 26].into(),
            supported_config_ids: [UwbConfigId::UnicastDsTwr, UwbConfigId::ProvisionedUnicastDsTwr].into(),
            min_ranging_interval_ms: 120,
            min_slot_duration_ms: 2,
            supported_roles: [DeviceRole::Initiator, DeviceRole::Responder].into(),
        }
    }

    fn uwb_config() -> UwbOobConfig {
        UwbOobConfig {
            sender_address: UwbAddress::new([0xab, 0xcd]),
            session_id: 0x1234_5678,
            config_id: UwbConfigId::UnicastDsTwr,
            channel: 9,
            preamble_index: 26,
            ranging_interval_ms: 120,
            slot_duration_ms: 2,
            session_key: vec![7; 8],
            country_code: CountryCode::try_from("US").unwrap(),
            device_role: DeviceRole::Initiator,
            device_mode: UwbDeviceMode::Controlee,
        }
    }

    fn parse_round_trip(message: OobMessage) {
        let bytes = message.serialize();
        let parsed = OobMessage::parse(&bytes).unwrap();
        assert_eq!(parsed, message);
        // Byte-exact in the other direction too.
        assert_eq!(parsed.serialize(), bytes);
    }

    #[test]
    fn capability_request_round_trip() {
        parse_round_trip(OobMessage::CapabilityRequest(CapabilityRequestMessage {
            requested: [RangingTechnology::Uwb, RangingTechnology::Rtt].into_iter().collect(),
        }));
    }

    #[test]
    fn capability_response_round_trip() {
        parse_round_trip(OobMessage::CapabilityResponse(CapabilityResponseMessage {
            priority: vec![RangingTechnology::Uwb, RangingTechnology::Rssi],
            uwb: Some(uwb_caps()),
            rtt: Some(RttOobCapabilities {
                azimuth_supported: false,
                periodic_ranging_supported: true,
                max_supported_bandwidth: 3,
                max_supported_rx_chains: 2,
            }),
            cs: Some(CsOobCapabilities {
                secure_supported: true,
                max_antenna_paths: 4,
            }),
            rssi: Some(RssiOobCapabilities),
        }));
    }

    #[test]
    fn set_configuration_round_trip() {
        parse_round_trip(OobMessage::SetConfiguration(SetConfigurationMessage {
            start_ranging: [RangingTechnology::Uwb].into_iter().collect(),
            uwb_config: Some(uwb_config()),
            rtt_config: Some(RttOobConfig {
                service_name: "rtt_ranging1a2b3c".into(),
                update_rate: UpdateRate::Normal,
                interval_ms: 1024,
            }),
            cs_config: Some(CsOobConfig {
                security_level: SecurityLevel::Secure,
                location_type: CsLocationType::Indoor,
                sight_type: CsSightType::LineOfSight,
            }),
            rssi_config: Some(RssiOobConfig {
                service_name: "rssi_ranging".into(),
                interval_ms: 500,
            }),
        }));
    }

    #[test]
    fn bitmap_message_round_trips() {
        let set: TechnologySet = [RangingTechnology::Cs, RangingTechnology::Rssi].into_iter().collect();
        parse_round_trip(OobMessage::StartRanging(StartRangingMessage {
            technologies: set.clone(),
        }));
        parse_round_trip(OobMessage::StopRanging(StopRangingMessage {
            technologies: set.clone(),
        }));
        parse_round_trip(OobMessage::StatusResponse(StatusResponseMessage { successes: set }));
    }

    #[test]
    fn rtt_config_block_size_is_name_len_plus_six() {
        let config = RttOobConfig {
            service_name: "rtt_ranging1a2b3c".into(),
            update_rate: UpdateRate::Frequent,
            interval_ms: 512,
        };
        let mut out = Vec::new();
        config.write_block(&mut out);
        assert_eq!(out.len(), config.service_name.len() + 6);
        assert_eq!(usize::from(out[1]), out.len());
    }

    #[test]
    fn unknown_message_type_rejected() {
        assert!(OobMessage::parse(&[9, PROTOCOL_VERSION, 0]).is_err());
    }

    #[test]
    fn wrong_version_rejected() {
        let mut bytes = CapabilityRequestMessage {
            requested: TechnologySet::new(),
        }
        .serialize();
        bytes[1] = 2;
        assert!(OobMessage::parse(&bytes).is_err());
    }

    #[test]
    fn truncated_messages_rejected() {
        let bytes = OobMessage::SetConfiguration(SetConfigurationMessage {
            start_ranging: TechnologySet::new(),
            uwb_config: Some(uwb_config()),
            rtt_config: None,
            cs_config: None,
            rssi_config: None,
        })
        .serialize();
        for len in 1..bytes.len() {
            assert!(OobMessage::parse(&bytes[..len]).is_err(), "accepted prefix of {len} bytes");
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = StopRangingMessage {
            technologies: TechnologySet::new(),
        }
        .serialize();
        bytes.push(0);
        assert!(OobMessage::parse(&bytes).is_err());
    }

    #[test]
    fn bad_session_key_length_rejected() {
        let mut config = uwb_config();
        config.session_key = vec![7; 9];
        let bytes = OobMessage::SetConfiguration(SetConfigurationMessage {
            start_ranging: TechnologySet::new(),
            uwb_config: Some(config),
            rtt_config: None,
            cs_config: None,
            rssi_config: None,
        })
        .serialize();
        assert!(OobMessage::parse(&bytes).is_err());
    }

    #[test]
    fn lowercase_country_code_rejected() {
        let mut bytes = OobMessage::SetConfiguration(SetConfigurationMessage {
            start_ranging: TechnologySet::new(),
            uwb_config: Some(uwb_config()),
            rtt_config: None,
            cs_config: None,
            rssi_config: None,
        })
        .serialize();
        let tail = bytes.len() - 4;
        bytes[tail] = b'u';
        assert!(OobMessage::parse(&bytes).is_err());
    }

    #[test]
    fn bitmap_payload_mismatch_rejected() {
        // Response advertises UWB in the bitmap but carries no UWB block.
        let mut bytes = CapabilityResponseMessage {
            priority: vec![],
            rssi: Some(RssiOobCapabilities),
            ..Default::default()
        }
        .serialize();
        bytes[3] |= RangingTechnology::Uwb.to_bit();
        assert!(OobMessage::parse(&bytes).is_err());
    }

    #[test]
    fn duplicate_technology_block_rejected() {
        let mut message = CapabilityResponseMessage {
            priority: vec![],
            rssi: Some(RssiOobCapabilities),
            ..Default::default()
        }
        .serialize();
        // Append a second RSSI block past the first.
        message.extend_from_slice(&[RangingTechnology::Rssi as u8, 3, 0]);
        assert!(OobMessage::parse(&message).is_err());
    }

    #[test]
    fn start_ranging_must_be_configured_subset() {
        let mut message = SetConfigurationMessage {
            start_ranging: TechnologySet::new(),
            rssi_config: Some(RssiOobConfig {
                service_name: "s".into(),
                interval_ms: 500,
            }),
            ..Default::default()
        }
        .serialize();
        // Claim UWB should start even though only RSSI is configured.
        message[5] |= RangingTechnology::Uwb.to_bit();
        assert!(OobMessage::parse(&message).is_err());
    }

    #[test]
    fn technology_block_size_overrun_rejected() {
        let mut bytes = CapabilityResponseMessage {
            priority: vec![],
            rssi: Some(RssiOobCapabilities),
            ..Default::default()
        }
        .serialize();
        let block_start = bytes.len() - RssiOobCapabilities::BLOCK_SIZE;
        bytes[block_start + 1] = 40; // declared size exceeds the buffer
        assert!(OobMessage::parse(&bytes).is_err());
    }

    #[test]
    fn arbitrary_buffers_parse_strictly_or_reserialize_exactly() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        // For any buffer, parsing either fails or yields a value that
        // serializes back to the same bytes. Bitmap fields tolerate unknown
        // bits by design, so the generator keeps bitmap bytes within the
        // assigned range.
        let mut rng = StdRng::seed_from_u64(0x0b5e55ed);
        let mut accepted = 0;
        for _ in 0..20_000 {
            let len = rng.gen_range(0..24);
            let mut bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            if bytes.len() >= 2 {
                // Bias toward valid headers so the accepting path is hit.
                bytes[0] = rng.gen_range(1..=7);
                bytes[1] = PROTOCOL_VERSION;
            }
            if bytes.len() > 2 {
                let last = bytes.len() - 1;
                for b in &mut bytes[2..last] {
                    *b = 0;
                }
                bytes[last] &= 0x0f;
            }
            if let Ok(message) = OobMessage::parse(&bytes) {
                accepted += 1;
                assert_eq!(message.serialize(), bytes, "unstable round-trip for {bytes:02x?}");
            }
        }
        assert!(accepted > 0, "the generator never produced an accepted buffer");
    }

    #[test]
    fn unknown_config_id_bits_ignored() {
        let caps = uwb_caps();
        let mut bytes = CapabilityResponseMessage {
            priority: vec![],
            uwb: Some(caps.clone()),
            ..Default::default()
        }
        .serialize();
        // Set a config-id bit with no assigned profile (bit 20).
        let payload_start = bytes.len() - UwbOobCapabilities::PAYLOAD_SIZE;
        bytes[payload_start + 11] |= 0x10;
        let parsed = match OobMessage::parse(&bytes).unwrap() {
            OobMessage::CapabilityResponse(m) => m,
            other => panic!("unexpected message {other:?}"),
        };
        assert_eq!(parsed.uwb.unwrap(), caps);
    }
}
