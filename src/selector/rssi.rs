//! BLE RSSI parameter selection.
//!
//! RSSI ranging needs nothing beyond capability presence: each capable peer
//! gets a unicast config carrying the client's sampling period and a derived
//! service name.

use std::collections::HashSet;

use crate::capabilities::RssiCapabilities;
use crate::config::{RssiRangingParams, TechnologyConfig, TechnologyParams};
use crate::device::RangingDevice;
use crate::oob::message::{CapabilityResponseMessage, RssiOobConfig};
use crate::selector::{ConfigSelector, OobConfigBlock, RssiUserParams, SelectorOutput};
use crate::technology::RangingTechnology;
use crate::{DeviceRole, Result};

const SERVICE_NAME_PREFIX: &str = "rssi_ranging";

/// Configures one unicast RSSI session per capable peer.
pub struct RssiSelector {
    params: RssiUserParams,
    peers: HashSet<RangingDevice>,
}

impl RssiSelector {
    /// Creates a selector; any BLE stack can sample RSSI, so construction
    /// never rejects the local device.
    pub fn new(params: RssiUserParams, _local: RssiCapabilities) -> Result<Self> {
        Ok(RssiSelector {
            params,
            peers: HashSet::new(),
        })
    }
}

impl ConfigSelector for RssiSelector {
    fn technology(&self) -> RangingTechnology {
        RangingTechnology::Rssi
    }

    fn add_peer_capabilities(&mut self, peer: RangingDevice, response: &CapabilityResponseMessage) {
        if response.rssi.is_some() {
            self.peers.insert(peer);
        }
    }

    fn has_peers_to_configure(&self) -> bool {
        !self.peers.is_empty()
    }

    fn select(&mut self) -> Result<SelectorOutput> {
        let mut output = SelectorOutput::default();
        for peer in self.peers.drain() {
            let hex = peer.uuid().simple().to_string();
            let service_name = format!("{SERVICE_NAME_PREFIX}{}", &hex[..6]);
            let local_config = TechnologyConfig::Unicast {
                role: DeviceRole::Initiator,
                peer,
                params: TechnologyParams::Rssi(RssiRangingParams {
                    service_name: service_name.clone(),
                    interval_ms: self.params.interval_ms,
                }),
            };
            let oob = RssiOobConfig {
                service_name,
                interval_ms: self.params.interval_ms,
            };
            output.configs.push((peer, local_config, OobConfigBlock::Rssi(oob)));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oob::message::RssiOobCapabilities;

    #[test]
    fn presence_gated_selection() {
        let mut s = RssiSelector::new(RssiUserParams { interval_ms: 500 }, RssiCapabilities::default()).unwrap();
        let capable = RangingDevice::random();
        s.add_peer_capabilities(capable, &CapabilityResponseMessage {
            rssi: Some(RssiOobCapabilities),
            ..Default::default()
        });
        s.add_peer_capabilities(RangingDevice::random(), &CapabilityResponseMessage::default());
        let output = s.select().unwrap();
        assert_eq!(output.configs.len(), 1);
        assert_eq!(output.configs[0].0, capable);
        let OobConfigBlock::Rssi(oob) = &output.configs[0].2 else {
            panic!("expected an rssi block");
        };
        assert_eq!(oob.interval_ms, 500);
        assert!(oob.service_name.starts_with("rssi_ranging"));
    }
}
