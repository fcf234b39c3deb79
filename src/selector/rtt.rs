//! Wi-Fi RTT parameter selection.

use std::collections::HashMap;

use crate::capabilities::RttCapabilities;
use crate::config::{RttRangingParams, TechnologyConfig, TechnologyParams, UpdateRate};
use crate::device::RangingDevice;
use crate::oob::message::{CapabilityResponseMessage, RttOobCapabilities, RttOobConfig};
use crate::selector::{ConfigSelector, OobConfigBlock, RttUserParams, SelectorOutput};
use crate::technology::RangingTechnology;
use crate::{DeviceRole, Result};

/// Measurement periods per cadence tier, in milliseconds.
pub const STANDARD_INTERVALS_MS: [u16; 3] = [512, 1024, 8192];
/// Measurement periods per cadence tier when both ends schedule ranging
/// bursts in hardware, in milliseconds.
pub const PERIODIC_INTERVALS_MS: [u16; 3] = [256, 512, 4096];

const SERVICE_NAME_PREFIX: &str = "rtt_ranging";

/// Derives the NAN service name both ends of an RTT session rendezvous
/// under: the fixed prefix plus the first six hex digits of the peer's UUID.
pub fn service_name_for(peer: &RangingDevice) -> String {
    let hex = peer.uuid().simple().to_string();
    format!("{SERVICE_NAME_PREFIX}{}", &hex[..6])
}

fn interval_for(rate: UpdateRate, periodic: bool) -> u16 {
    let table = if periodic { PERIODIC_INTERVALS_MS } else { STANDARD_INTERVALS_MS };
    match rate {
        UpdateRate::Frequent => table[0],
        UpdateRate::Normal => table[1],
        UpdateRate::Infrequent => table[2],
    }
}

/// Configures one unicast RTT session per capable peer.
///
/// The local periodic-ranging flag is selector state, captured from the
/// capability record at construction.
pub struct RttSelector {
    params: RttUserParams,
    local_periodic: bool,
    peers: HashMap<RangingDevice, RttOobCapabilities>,
}

impl RttSelector {
    /// Creates a selector from the client's wishes and the local Wi-Fi stack.
    pub fn new(params: RttUserParams, local: RttCapabilities) -> Result<Self> {
        Ok(RttSelector {
            params,
            local_periodic: local.periodic_ranging_supported,
            peers: HashMap::new(),
        })
    }
}

impl ConfigSelector for RttSelector {
    fn technology(&self) -> RangingTechnology {
        RangingTechnology::Rtt
    }

    fn add_peer_capabilities(&mut self, peer: RangingDevice, response: &CapabilityResponseMessage) {
        if let Some(caps) = response.rtt {
            self.peers.insert(peer, caps);
        }
    }

    fn has_peers_to_configure(&self) -> bool {
        !self.peers.is_empty()
    }

    fn select(&mut self) -> Result<SelectorOutput> {
        let mut output = SelectorOutput::default();
        for (peer, caps) in self.peers.drain() {
            let periodic = self.local_periodic && caps.periodic_ranging_supported;
            let interval_ms = interval_for(self.params.update_rate, periodic);
            let service_name = service_name_for(&peer);
            let local_config = TechnologyConfig::Unicast {
                role: DeviceRole::Initiator,
                peer,
                params: TechnologyParams::Rtt(RttRangingParams {
                    service_name: service_name.clone(),
                    update_rate: self.params.update_rate,
                    periodic,
                    interval_ms,
                }),
            };
            let oob = RttOobConfig {
                service_name,
                update_rate: self.params.update_rate,
                interval_ms,
            };
            output.configs.push((peer, local_config, OobConfigBlock::Rtt(oob)));
        }
        Ok(output)
    }
}
