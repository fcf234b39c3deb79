//! The initiator side of the OOB handshake.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::capabilities::CapabilitiesProvider;
use crate::config::RangingMode;
use crate::device::RangingDevice;
use crate::error::ClosedReason;
use crate::oob::connection::{OobConnector, PeerLink, DEFAULT_OOB_TIMEOUT};
use crate::oob::message::{CapabilityResponseMessage, OobMessage, StopRangingMessage};
use crate::selector::{RangingEngine, TechnologyPreferences};
use crate::session::RangingSession;
use crate::{Error, ErrorKind, Result};

/// Drives the full out-of-band handshake against a set of peers, then hands
/// the selected configuration to the session kernel.
///
/// The handshake is a linear sequence of bounded steps: connect, request
/// capabilities, await responses, select, distribute configuration, start.
/// Peers that time out, fail to parse, or cannot be satisfied are dropped
/// individually; the handshake fails as a whole only when no peer remains.
///
/// Cancellation works by closing the per-peer connections:
/// [`stop`](Self::stop) closes every link, which makes any in-flight send or
/// receive fail and the handshake unwind.
pub struct OobInitiatorSession {
    session: Arc<RangingSession>,
    connector: Arc<dyn OobConnector>,
    provider: Arc<dyn CapabilitiesProvider>,
    timeout: Duration,
    links: Mutex<HashMap<RangingDevice, Arc<PeerLink>>>,
    cancelled: AtomicBool,
}

impl OobInitiatorSession {
    /// Creates an initiator bound to `session`, with the default OOB step
    /// timeout.
    pub fn new(
        session: Arc<RangingSession>,
        connector: Arc<dyn OobConnector>,
        provider: Arc<dyn CapabilitiesProvider>,
    ) -> Self {
        OobInitiatorSession {
            session,
            connector,
            provider,
            timeout: DEFAULT_OOB_TIMEOUT,
            links: Mutex::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Overrides the per-step OOB timeout.
    pub fn with_oob_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the handshake and starts the session.
    ///
    /// Fails with [`NoPeersFound`](ErrorKind::NoPeersFound) when every peer
    /// was dropped along the way, and with the selector's reason when
    /// selection itself fails.
    pub async fn start(
        &self,
        devices: Vec<RangingDevice>,
        mode: RangingMode,
        preferences: TechnologyPreferences,
        rng: StdRng,
    ) -> Result<()> {
        let local = self.provider.capabilities().await?;
        let mut engine = RangingEngine::new(mode, &preferences, &local, rng)?;

        // Step 1: open a connection per peer.
        for device in devices {
            match self.connector.connect(&device).await {
                Ok(connection) => {
                    let link = Arc::new(PeerLink::new(device, connection, self.timeout));
                    self.links.lock().await.insert(device, link);
                }
                Err(e) => warn!("dropping {device}: oob connect failed: {e}"),
            }
        }
        self.ensure_peers_remain("no peer is reachable over oob").await?;

        // Steps 2-4: capability exchange, concurrently per peer, each send
        // and receive bounded by the step timeout.
        let request = engine.capability_request();
        let mut exchanges: JoinSet<(RangingDevice, Result<CapabilityResponseMessage>)> = JoinSet::new();
        for link in self.snapshot().await {
            let request = request.clone();
            exchanges.spawn(async move {
                let result = async {
                    link.send_message(&OobMessage::CapabilityRequest(request)).await?;
                    link.receive_matching(|message| match message {
                        OobMessage::CapabilityResponse(response) => Some(response),
                        _ => None,
                    })
                    .await
                }
                .await;
                (link.device, result)
            });
        }
        while let Some(joined) = exchanges.join_next().await {
            let Ok((device, result)) = joined else { continue };
            let outcome = result.and_then(|response| engine.add_peer_capabilities(device, &response));
            if let Err(e) = outcome {
                warn!("dropping {device}: capability exchange failed: {e}");
                self.drop_peer(device).await;
            }
        }
        self.check_cancelled()?;
        self.ensure_peers_remain("every peer failed the capability exchange").await?;

        // Step 5: selection.
        let selected = engine.select_configs()?;
        for (device, reason) in &selected.rejected_peers {
            warn!("dropping {device}: {reason}");
            self.drop_peer(*device).await;
        }
        if selected.peer_messages.is_empty() {
            self.close_all().await;
            return Err(Error::new(ErrorKind::NoPeersFound, "no peer accepted a configuration"));
        }

        // Step 6: distribute the configuration.
        let mut sends: JoinSet<(RangingDevice, Result<()>)> = JoinSet::new();
        let links = self.links.lock().await;
        for (device, message) in selected.peer_messages {
            let Some(link) = links.get(&device).map(Arc::clone) else {
                continue;
            };
            sends.spawn(async move {
                let result = link.send_message(&OobMessage::SetConfiguration(message)).await;
                (link.device, result)
            });
        }
        drop(links);
        let mut configured: Vec<RangingDevice> = Vec::new();
        while let Some(joined) = sends.join_next().await {
            let Ok((device, result)) = joined else { continue };
            match result {
                Ok(()) => configured.push(device),
                Err(e) => {
                    warn!("dropping {device}: set configuration failed: {e}");
                    self.drop_peer(device).await;
                }
            }
        }
        if configured.is_empty() {
            self.close_all().await;
            return Err(Error::new(ErrorKind::NoPeersFound, "no peer received the configuration"));
        }
        self.check_cancelled()?;

        // Step 7: hand the surviving configs to the kernel and keep
        // listening for peer-initiated traffic.
        let local_configs = selected
            .local_configs
            .into_iter()
            .filter(|config| config.peers().iter().all(|peer| configured.contains(peer)))
            .collect::<Vec<_>>();
        info!("oob handshake complete, starting {} configs", local_configs.len());
        self.session.start(local_configs).await?;
        for link in self.snapshot().await {
            let session = Arc::clone(&self.session);
            tokio::spawn(async move {
                listen_to_peer(link, session).await;
            });
        }
        Ok(())
    }

    /// Runs the stop protocol: tells every remaining peer which technologies
    /// to stop, then stops the kernel regardless of send outcomes.
    pub async fn stop(&self) {
        self.cancelled.store(true, Ordering::Release);
        let links: Vec<Arc<PeerLink>> = self.links.lock().await.drain().map(|(_, link)| link).collect();
        for link in links {
            let technologies = self.session.peer_technologies(link.device).await;
            let message = OobMessage::StopRanging(StopRangingMessage { technologies });
            if let Err(e) = link.send_message(&message).await {
                debug!("stop message to {} not delivered: {e}", link.device);
            }
            link.close().await;
        }
        self.session.stop().await;
    }

    async fn snapshot(&self) -> Vec<Arc<PeerLink>> {
        self.links.lock().await.values().map(Arc::clone).collect()
    }

    async fn drop_peer(&self, device: RangingDevice) {
        if let Some(link) = self.links.lock().await.remove(&device) {
            link.close().await;
        }
    }

    async fn close_all(&self) {
        for (_, link) in self.links.lock().await.drain() {
            link.close().await;
        }
    }

    async fn ensure_peers_remain(&self, context: &str) -> Result<()> {
        if self.links.lock().await.is_empty() {
            return Err(Error::new(ErrorKind::NoPeersFound, context));
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::InvalidState, "oob session cancelled"));
        }
        Ok(())
    }
}

/// Post-handshake listener: peers may acknowledge configuration and request
/// technology stops on their own initiative.
async fn listen_to_peer(link: Arc<PeerLink>, session: Arc<RangingSession>) {
    loop {
        match link.receive_message_untimed().await {
            Ok(OobMessage::StatusResponse(status)) => {
                debug!("{} acknowledged {}", link.device, status.successes);
            }
            Ok(OobMessage::StopRanging(stop)) => {
                info!("{} asked to stop {}", link.device, stop.technologies);
                session.stop_technologies(&stop.technologies, ClosedReason::RemoteRequest).await;
            }
            Ok(message) => debug!("ignoring unexpected {message:?} from {}", link.device),
            Err(e) => {
                debug!("oob listener for {} ended: {e}", link.device);
                return;
            }
        }
    }
}
