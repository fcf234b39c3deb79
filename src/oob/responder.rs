//! The responder side of the OOB handshake.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::capabilities::{Capabilities, CapabilitiesProvider};
use crate::config::{
    CsRangingParams, RssiRangingParams, RttRangingParams, TechnologyConfig, TechnologyParams, UwbRangingParams,
};
use crate::device::{RangingDevice, UwbAddress};
use crate::error::ClosedReason;
use crate::oob::connection::{OobConnection, PeerLink, DEFAULT_OOB_TIMEOUT};
use crate::oob::message::{
    CapabilityRequestMessage, CapabilityResponseMessage, CsOobCapabilities, OobMessage, RssiOobCapabilities,
    RttOobCapabilities, SetConfigurationMessage, StatusResponseMessage, UwbOobCapabilities,
};
use crate::selector::rtt::PERIODIC_INTERVALS_MS;
use crate::session::{RangingSession, SessionState};
use crate::technology::{RangingTechnology, TechnologySet};
use crate::{ErrorKind, Result};

/// Mirrors the initiator: answers the capability request, applies the
/// received configuration, starts the kernel, and keeps serving start/stop
/// commands until the connection closes.
pub struct OobResponderSession {
    session: Arc<RangingSession>,
    provider: Arc<dyn CapabilitiesProvider>,
    link: PeerLink,
    peer: RangingDevice,
    local_uwb_address: UwbAddress,
    pending: HashMap<RangingTechnology, TechnologyConfig>,
}

impl OobResponderSession {
    /// Creates a responder serving one initiator over `connection`.
    pub fn new(
        session: Arc<RangingSession>,
        provider: Arc<dyn CapabilitiesProvider>,
        peer: RangingDevice,
        connection: Box<dyn OobConnection>,
        mut rng: StdRng,
    ) -> Self {
        OobResponderSession {
            session,
            provider,
            link: PeerLink::new(peer, connection, DEFAULT_OOB_TIMEOUT),
            peer,
            local_uwb_address: UwbAddress::random(&mut rng),
            pending: HashMap::new(),
        }
    }

    /// Serves the initiator until the connection closes.
    ///
    /// Returns an error when the initiator sends a malformed message or the
    /// kernel refuses a received configuration; a transport-level close is a
    /// normal end.
    pub async fn run(mut self) -> Result<()> {
        loop {
            match self.link.receive_message_untimed().await {
                Ok(OobMessage::CapabilityRequest(request)) => self.answer_capability_request(request).await?,
                Ok(OobMessage::SetConfiguration(message)) => self.apply_configuration(message).await?,
                Ok(OobMessage::StartRanging(message)) => self.start_pending(&message.technologies).await?,
                Ok(OobMessage::StopRanging(message)) => {
                    info!("{} asked to stop {}", self.peer, message.technologies);
                    self.session
                        .stop_technologies(&message.technologies, ClosedReason::RemoteRequest)
                        .await;
                    self.acknowledge(message.technologies).await;
                }
                Ok(message) => debug!("ignoring unexpected {message:?} from {}", self.peer),
                Err(e) if e.kind == ErrorKind::MalformedMessage => {
                    warn!("dropping initiator {}: {e}", self.peer);
                    self.link.close().await;
                    return Err(e);
                }
                Err(e) => {
                    debug!("oob responder for {} ended: {e}", self.peer);
                    return Ok(());
                }
            }
        }
    }

    async fn answer_capability_request(&mut self, request: CapabilityRequestMessage) -> Result<()> {
        let local = self.provider.capabilities().await?;
        let scoped = local.supported_technologies().intersection(&request.requested);
        debug!("{} asked for {}, answering {scoped}", self.peer, request.requested);
        let response = self.capability_response(&local, &scoped);
        self.link.send_message(&OobMessage::CapabilityResponse(response)).await
    }

    fn capability_response(&self, local: &Capabilities, scoped: &TechnologySet) -> CapabilityResponseMessage {
        let mut response = CapabilityResponseMessage {
            priority: scoped.iter().collect(),
            ..Default::default()
        };
        if scoped.contains(RangingTechnology::Uwb) {
            if let Some(uwb) = &local.uwb {
                response.uwb = Some(UwbOobCapabilities {
                    address: self.local_uwb_address,
                    supported_channels: uwb.supported_channels.clone(),
                    supported_preamble_indexes: uwb.supported_preamble_indexes.clone(),
                    supported_config_ids: uwb.supported_config_ids.clone(),
                    min_ranging_interval_ms: uwb.min_ranging_interval_ms,
                    min_slot_duration_ms: uwb.min_slot_duration_ms,
                    supported_roles: uwb.supported_roles.clone(),
                });
            }
        }
        if scoped.contains(RangingTechnology::Rtt) {
            if let Some(rtt) = &local.rtt {
                response.rtt = Some(RttOobCapabilities {
                    azimuth_supported: rtt.azimuth_supported,
                    periodic_ranging_supported: rtt.periodic_ranging_supported,
                    max_supported_bandwidth: rtt.max_supported_bandwidth,
                    max_supported_rx_chains: rtt.max_supported_rx_chains,
                });
            }
        }
        if scoped.contains(RangingTechnology::Cs) {
            if let Some(cs) = &local.cs {
                response.cs = Some(CsOobCapabilities {
                    secure_supported: cs.secure_supported,
                    max_antenna_paths: cs.max_antenna_paths,
                });
            }
        }
        if scoped.contains(RangingTechnology::Rssi) && local.rssi.is_some() {
            response.rssi = Some(RssiOobCapabilities);
        }
        response
    }

    async fn apply_configuration(&mut self, message: SetConfigurationMessage) -> Result<()> {
        let technologies = message.technologies();
        info!("{} configured {technologies}, starting {}", self.peer, message.start_ranging);
        let start_ranging = message.start_ranging.clone();
        for config in self.translate(message) {
            self.pending.insert(config.technology(), config);
        }
        self.acknowledge(technologies).await;
        if start_ranging.is_empty() {
            // Everything stays pending until a start-ranging command.
            return Ok(());
        }
        self.start_pending(&start_ranging).await
    }

    /// Maps each received payload into a local adapter configuration with
    /// this device in the role the initiator assigned.
    fn translate(&self, message: SetConfigurationMessage) -> Vec<TechnologyConfig> {
        let mut configs = Vec::new();
        if let Some(uwb) = message.uwb_config {
            configs.push(TechnologyConfig::Unicast {
                role: uwb.device_role,
                peer: self.peer,
                params: TechnologyParams::Uwb(UwbRangingParams {
                    session_id: uwb.session_id,
                    config_id: uwb.config_id,
                    channel: uwb.channel,
                    preamble_index: uwb.preamble_index,
                    ranging_interval_ms: uwb.ranging_interval_ms,
                    slot_duration_ms: uwb.slot_duration_ms,
                    session_key: uwb.session_key,
                    local_address: self.local_uwb_address,
                    peer_address: uwb.sender_address,
                    country_code: uwb.country_code,
                    device_mode: uwb.device_mode,
                }),
            });
        }
        if let Some(rtt) = message.rtt_config {
            configs.push(TechnologyConfig::Unicast {
                role: crate::DeviceRole::Responder,
                peer: self.peer,
                params: TechnologyParams::Rtt(RttRangingParams {
                    service_name: rtt.service_name,
                    update_rate: rtt.update_rate,
                    periodic: PERIODIC_INTERVALS_MS.contains(&rtt.interval_ms),
                    interval_ms: rtt.interval_ms,
                }),
            });
        }
        if let Some(cs) = message.cs_config {
            configs.push(TechnologyConfig::Unicast {
                role: crate::DeviceRole::Responder,
                peer: self.peer,
                params: TechnologyParams::Cs(CsRangingParams {
                    security_level: cs.security_level,
                    location_type: cs.location_type,
                    sight_type: cs.sight_type,
                }),
            });
        }
        if let Some(rssi) = message.rssi_config {
            configs.push(TechnologyConfig::Unicast {
                role: crate::DeviceRole::Responder,
                peer: self.peer,
                params: TechnologyParams::Rssi(RssiRangingParams {
                    service_name: rssi.service_name,
                    interval_ms: rssi.interval_ms,
                }),
            });
        }
        configs
    }

    async fn start_pending(&mut self, technologies: &TechnologySet) -> Result<()> {
        if self.session.state().await != SessionState::Stopped {
            warn!("{} asked to start {technologies} but the session already runs", self.peer);
            return Ok(());
        }
        let configs: Vec<TechnologyConfig> = technologies
            .iter()
            .filter_map(|tech| self.pending.remove(&tech))
            .collect();
        if configs.is_empty() {
            warn!("{} asked to start {technologies} with nothing pending", self.peer);
            return Ok(());
        }
        self.session.start(configs).await
    }

    async fn acknowledge(&self, successes: TechnologySet) {
        let message = OobMessage::StatusResponse(StatusResponseMessage { successes });
        if let Err(e) = self.link.send_message(&message).await {
            debug!("acknowledgement to {} not delivered: {e}", self.peer);
        }
    }
}
