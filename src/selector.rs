//! Configuration selection.
//!
//! Given the local capabilities, the client's preferences, and each peer's
//! capability report, the [`RangingEngine`] narrows every technology's
//! parameter space to one concrete configuration per peer, or rejects the
//! peer with a precise reason. Each technology has its own
//! [`ConfigSelector`]; the engine orchestrates them and enforces the
//! session's [`RangingMode`] policy.

pub mod cs;
pub mod rssi;
pub mod rtt;
pub mod uwb;

use std::collections::HashMap;

use rand::rngs::StdRng;
use tracing::debug;

pub use cs::CsSelector;
pub use rssi::RssiSelector;
pub use rtt::RttSelector;
pub use uwb::UwbSelector;

use crate::capabilities::Capabilities;
use crate::config::{CsLocationType, CsSightType, RangingMode, SecurityLevel, TechnologyConfig, UpdateRate};
use crate::device::RangingDevice;
use crate::oob::message::{
    CapabilityRequestMessage, CapabilityResponseMessage, CsOobConfig, RssiOobConfig, RttOobConfig,
    SetConfigurationMessage, UwbOobConfig,
};
use crate::technology::{RangingTechnology, TechnologySet};
use crate::{Error, ErrorKind, Result};

/// The client's per-technology wishes, before negotiation.
///
/// A `None` entry means the technology should not be ranged over at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TechnologyPreferences {
    /// UWB wishes
    pub uwb: Option<UwbUserParams>,
    /// Wi-Fi RTT wishes
    pub rtt: Option<RttUserParams>,
    /// Channel Sounding wishes
    pub cs: Option<CsUserParams>,
    /// BLE RSSI wishes
    pub rssi: Option<RssiUserParams>,
}

/// What the client asks of a UWB session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UwbUserParams {
    /// Requested security posture
    pub security_level: SecurityLevel,
    /// Fastest acceptable ranging interval, in milliseconds
    pub fastest_interval_ms: u16,
    /// Slowest acceptable ranging interval, in milliseconds
    pub slowest_interval_ms: u16,
}

/// What the client asks of a Wi-Fi RTT session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RttUserParams {
    /// Requested cadence tier
    pub update_rate: UpdateRate,
}

/// What the client asks of a Channel Sounding session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsUserParams {
    /// Requested security posture
    pub security_level: SecurityLevel,
    /// Environment hint
    pub location_type: CsLocationType,
    /// Visibility hint
    pub sight_type: CsSightType,
}

/// What the client asks of a BLE RSSI session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RssiUserParams {
    /// Sampling period, in milliseconds
    pub interval_ms: u16,
}

/// One technology's outbound configuration for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OobConfigBlock {
    /// A UWB config payload
    Uwb(UwbOobConfig),
    /// An RTT config payload
    Rtt(RttOobConfig),
    /// A CS config payload
    Cs(CsOobConfig),
    /// An RSSI config payload
    Rssi(RssiOobConfig),
}

/// What one selector produced: accepted peers with their local config and
/// outbound payload, and rejected peers with the reason.
#[derive(Debug, Default)]
pub struct SelectorOutput {
    /// Per accepted peer: the adapter config and the peer's OOB payload
    pub configs: Vec<(RangingDevice, TechnologyConfig, OobConfigBlock)>,
    /// Peers this technology cannot serve, with the reason
    pub rejected: Vec<(RangingDevice, Error)>,
}

/// Narrows one technology's capability intersection into concrete parameters.
pub trait ConfigSelector: Send {
    /// The technology this selector configures.
    fn technology(&self) -> RangingTechnology;

    /// Feeds one peer's capability report. Responses without a payload for
    /// this technology leave the peer unconfigured here.
    fn add_peer_capabilities(&mut self, peer: RangingDevice, response: &CapabilityResponseMessage);

    /// Whether any peer reported capabilities for this technology.
    fn has_peers_to_configure(&self) -> bool;

    /// Produces the per-peer selection.
    fn select(&mut self) -> Result<SelectorOutput>;
}

/// The selected configuration set for the whole session.
#[derive(Debug, Default)]
pub struct SelectedConfig {
    /// Configs to start local adapters with
    pub local_configs: Vec<TechnologyConfig>,
    /// Outbound set-configuration message per accepted peer
    pub peer_messages: HashMap<RangingDevice, SetConfigurationMessage>,
    /// Peers no acceptable technology subset could be found for
    pub rejected_peers: Vec<(RangingDevice, Error)>,
}

/// Orchestrates the per-technology selectors.
pub struct RangingEngine {
    mode: RangingMode,
    selectors: Vec<Box<dyn ConfigSelector>>,
}

impl RangingEngine {
    /// Builds one selector per technology that is both requested in
    /// `preferences` and locally capable.
    ///
    /// Fails with [`Unsupported`](ErrorKind::Unsupported) when the local
    /// device cannot satisfy the preferences at all: no requested technology
    /// is available, a [`RangingMode::UwbOnly`] session lacks UWB, or a
    /// [`RangingMode::AllRequired`] session lacks any requested technology.
    pub fn new(
        mode: RangingMode,
        preferences: &TechnologyPreferences,
        local: &Capabilities,
        rng: StdRng,
    ) -> Result<Self> {
        let mut selectors: Vec<Box<dyn ConfigSelector>> = Vec::new();
        let mut missing = TechnologySet::new();

        if let Some(params) = &preferences.uwb {
            match &local.uwb {
                Some(caps) => selectors.push(Box::new(UwbSelector::new(params.clone(), caps.clone(), rng)?)),
                None => {
                    missing.insert(RangingTechnology::Uwb);
                }
            }
        }
        if let Some(params) = &preferences.cs {
            match &local.cs {
                Some(caps) => selectors.push(Box::new(CsSelector::new(params.clone(), caps.clone())?)),
                None => {
                    missing.insert(RangingTechnology::Cs);
                }
            }
        }
        if let Some(params) = &preferences.rtt {
            match &local.rtt {
                Some(caps) => selectors.push(Box::new(RttSelector::new(params.clone(), caps.clone())?)),
                None => {
                    missing.insert(RangingTechnology::Rtt);
                }
            }
        }
        if let Some(params) = &preferences.rssi {
            match &local.rssi {
                Some(caps) => selectors.push(Box::new(RssiSelector::new(params.clone(), caps.clone())?)),
                None => {
                    missing.insert(RangingTechnology::Rssi);
                }
            }
        }

        if selectors.is_empty() {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "no requested ranging technology is available locally",
            ));
        }
        let available: TechnologySet = selectors.iter().map(|s| s.technology()).collect();
        match mode {
            RangingMode::UwbOnly if !available.contains(RangingTechnology::Uwb) => {
                return Err(Error::new(ErrorKind::Unsupported, "uwb-only session without local uwb"));
            }
            RangingMode::AllRequired if !missing.is_empty() => {
                return Err(Error::new(
                    ErrorKind::Unsupported,
                    format!("required technologies unavailable locally: {missing}"),
                ));
            }
            _ => {}
        }
        // UWB-only sessions negotiate nothing else, whatever was asked for.
        if mode == RangingMode::UwbOnly {
            selectors.retain(|s| s.technology() == RangingTechnology::Uwb);
        }
        Ok(RangingEngine { mode, selectors })
    }

    /// The technologies to advertise in the outbound capability request.
    pub fn requested_technologies(&self) -> TechnologySet {
        self.selectors.iter().map(|s| s.technology()).collect()
    }

    /// The capability request to open the handshake with.
    pub fn capability_request(&self) -> CapabilityRequestMessage {
        CapabilityRequestMessage {
            requested: self.requested_technologies(),
        }
    }

    /// Feeds one peer's capability response to every selector.
    ///
    /// Fails with [`PeerCapabilitiesMismatch`](ErrorKind::PeerCapabilitiesMismatch)
    /// when the response covers none of the requested technologies; such a
    /// peer can never be configured.
    pub fn add_peer_capabilities(&mut self, peer: RangingDevice, response: &CapabilityResponseMessage) -> Result<()> {
        let usable = response.supported_technologies().intersection(&self.requested_technologies());
        if usable.is_empty() {
            return Err(Error::new(
                ErrorKind::PeerCapabilitiesMismatch,
                format!("peer {peer} supports none of the requested technologies"),
            ));
        }
        for selector in &mut self.selectors {
            selector.add_peer_capabilities(peer, response);
        }
        Ok(())
    }

    /// Runs every selector with peers to configure and assembles the final
    /// configuration set, enforcing the ranging-mode policy per peer.
    pub fn select_configs(&mut self) -> Result<SelectedConfig> {
        let requested = self.requested_technologies();
        let mut local_by_peer: HashMap<RangingDevice, Vec<TechnologyConfig>> = HashMap::new();
        let mut messages: HashMap<RangingDevice, SetConfigurationMessage> = HashMap::new();
        let mut rejections: HashMap<RangingDevice, Error> = HashMap::new();

        for selector in &mut self.selectors {
            if !selector.has_peers_to_configure() {
                continue;
            }
            let output = selector.select()?;
            for (peer, error) in output.rejected {
                debug!("{} selection rejected peer {peer}: {error}", selector.technology());
                rejections.entry(peer).or_insert(error);
            }
            for (peer, config, block) in output.configs {
                local_by_peer.entry(peer).or_default().push(config);
                let message = messages.entry(peer).or_default();
                match block {
                    OobConfigBlock::Uwb(c) => message.uwb_config = Some(c),
                    OobConfigBlock::Rtt(c) => message.rtt_config = Some(c),
                    OobConfigBlock::Cs(c) => message.cs_config = Some(c),
                    OobConfigBlock::Rssi(c) => message.rssi_config = Some(c),
                }
            }
        }

        let mut selected = SelectedConfig::default();
        for (peer, message) in messages {
            let technologies = message.technologies();
            let acceptable = match self.mode {
                RangingMode::UwbOnly => technologies.contains(RangingTechnology::Uwb),
                RangingMode::BestAvailable => !technologies.is_empty(),
                RangingMode::AllRequired => technologies == requested,
            };
            if acceptable {
                let mut message = message;
                message.start_ranging = message.technologies();
                selected.local_configs.extend(local_by_peer.remove(&peer).unwrap_or_default());
                selected.peer_messages.insert(peer, message);
                rejections.remove(&peer);
            } else {
                rejections.entry(peer).or_insert_with(|| {
                    Error::new(
                        ErrorKind::PeerCapabilitiesMismatch,
                        format!("peer {peer} configured {technologies} but the mode requires more"),
                    )
                });
            }
        }
        selected.rejected_peers = rejections.into_iter().collect();
        Ok(selected)
    }
}
