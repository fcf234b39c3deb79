//! Bluetooth Channel Sounding parameter selection.
//!
//! CS sessions take the client's parameters as-is; the only negotiation is
//! capability presence and, for secure sessions, secure-procedure support on
//! both ends.

use std::collections::HashMap;

use crate::capabilities::CsCapabilities;
use crate::config::{CsRangingParams, SecurityLevel, TechnologyConfig, TechnologyParams};
use crate::device::RangingDevice;
use crate::oob::message::{CapabilityResponseMessage, CsOobCapabilities, CsOobConfig};
use crate::selector::{ConfigSelector, CsUserParams, OobConfigBlock, SelectorOutput};
use crate::technology::RangingTechnology;
use crate::{DeviceRole, Error, ErrorKind, Result};

/// Configures one unicast CS session per capable peer.
pub struct CsSelector {
    params: CsUserParams,
    peers: HashMap<RangingDevice, CsOobCapabilities>,
}

impl CsSelector {
    /// Validates the local controller against the client's wishes.
    pub fn new(params: CsUserParams, local: CsCapabilities) -> Result<Self> {
        if params.security_level == SecurityLevel::Secure && !local.secure_supported {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "local controller lacks secure channel sounding",
            ));
        }
        Ok(CsSelector {
            params,
            peers: HashMap::new(),
        })
    }
}

impl ConfigSelector for CsSelector {
    fn technology(&self) -> RangingTechnology {
        RangingTechnology::Cs
    }

    fn add_peer_capabilities(&mut self, peer: RangingDevice, response: &CapabilityResponseMessage) {
        if let Some(caps) = response.cs {
            self.peers.insert(peer, caps);
        }
    }

    fn has_peers_to_configure(&self) -> bool {
        !self.peers.is_empty()
    }

    fn select(&mut self) -> Result<SelectorOutput> {
        let mut output = SelectorOutput::default();
        for (peer, caps) in self.peers.drain() {
            if self.params.security_level == SecurityLevel::Secure && !caps.secure_supported {
                output.rejected.push((
                    peer,
                    Error::new(ErrorKind::PeerCapabilitiesMismatch, "peer lacks secure channel sounding"),
                ));
                continue;
            }
            let params = CsRangingParams {
                security_level: self.params.security_level,
                location_type: self.params.location_type,
                sight_type: self.params.sight_type,
            };
            let local_config = TechnologyConfig::Unicast {
                role: DeviceRole::Initiator,
                peer,
                params: TechnologyParams::Cs(params),
            };
            let oob = CsOobConfig {
                security_level: self.params.security_level,
                location_type: self.params.location_type,
                sight_type: self.params.sight_type,
            };
            output.configs.push((peer, local_config, OobConfigBlock::Cs(oob)));
        }
        Ok(output)
    }
}
