//! The session kernel.
//!
//! A [`RangingSession`] owns the adapters and peers of one logical ranging
//! session, runs the session state machine, and routes adapter events through
//! per-peer fusion up to the [`SessionListener`]. All session state lives
//! behind one async mutex; adapter events are serialized through a single
//! channel drained by a spawned event loop, so every state change and every
//! listener dispatch happens under the session lock. Calls into adapters
//! (which reach radio stacks) are always made outside the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_core::Stream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::adapter::{AdapterEvent, AdapterEventSender, AdapterFactory, AdapterId, RangingAdapter};
use crate::config::{AttributionSource, SessionConfig, TechnologyConfig};
use crate::device::RangingDevice;
use crate::error::{ClosedReason, SessionClosedReason};
use crate::fusion::fuser::PreferentialFuser;
use crate::fusion::{FilteringFusionEngine, FusionEngine, FusionListener, NoOpFusionEngine};
use crate::gate::NotificationGate;
use crate::technology::{RangingTechnology, TechnologySet};
use crate::util::ReceiverStream;
use crate::{Error, ErrorKind, RangingData, Result};

/// How long an attributed app may stay backgrounded before adapters are told
/// to enforce their background policy.
pub const DEFAULT_BACKGROUND_TIMEOUT: Duration = Duration::from_secs(60);

/// The session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No adapters exist
    Stopped,
    /// Adapters are starting; no peer has reported yet
    Starting,
    /// At least one adapter reported started
    Started,
    /// A stop is in flight; waiting for adapters to close
    Stopping,
}

/// Receives session events. Held as a non-owning callback; implementations
/// must not block and must not acquire resources.
pub trait SessionListener: Send + Sync {
    /// The finalized configuration set, before any adapter starts.
    fn on_configurations_selected(&self, _configs: &[TechnologyConfig]) {}

    /// A technology began ranging to a peer.
    fn on_started(&self, peer: RangingDevice, technology: RangingTechnology);

    /// A fused measurement passed the notification gate.
    fn on_ranging_data(&self, peer: RangingDevice, data: RangingData);

    /// A technology stopped ranging to a peer.
    fn on_stopped(&self, peer: RangingDevice, technology: RangingTechnology, reason: ClosedReason);

    /// The session closed. Fires exactly once, after every adapter closed.
    fn on_session_closed(&self, reason: SessionClosedReason);
}

/// A cancellable alarm registration.
pub struct AlarmHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl AlarmHandle {
    /// Wraps a cancel action.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        AlarmHandle {
            cancel: Some(Box::new(cancel)),
        }
    }

    fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// The external alarm service the background deadline is registered with.
pub trait AlarmScheduler: Send + Sync {
    /// Runs `alarm` once after `delay`, unless the handle is cancelled first.
    fn schedule(&self, delay: Duration, alarm: Box<dyn FnOnce() + Send>) -> AlarmHandle;
}

/// An [`AlarmScheduler`] backed by the Tokio timer.
#[derive(Debug, Default)]
pub struct TokioAlarmScheduler;

impl AlarmScheduler for TokioAlarmScheduler {
    fn schedule(&self, delay: Duration, alarm: Box<dyn FnOnce() + Send>) -> AlarmHandle {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            alarm();
        });
        AlarmHandle::new(move || task.abort())
    }
}

/// Events surfaced by the [`SessionEventQueue`] listener.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The finalized configuration set
    ConfigurationsSelected(Vec<TechnologyConfig>),
    /// A technology began ranging to a peer
    Started {
        /// The peer
        peer: RangingDevice,
        /// The technology that started
        technology: RangingTechnology,
    },
    /// A fused measurement
    RangingData {
        /// The peer
        peer: RangingDevice,
        /// The measurement
        data: RangingData,
    },
    /// A technology stopped ranging to a peer
    Stopped {
        /// The peer
        peer: RangingDevice,
        /// The technology that stopped
        technology: RangingTechnology,
        /// Why it stopped
        reason: ClosedReason,
    },
    /// The session closed
    SessionClosed(SessionClosedReason),
}

/// A [`SessionListener`] that queues events into a stream, for embedders
/// that prefer pulling events to implementing callbacks.
pub struct SessionEventQueue {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionEventQueue {
    /// Creates the listener and the stream it feeds.
    pub fn new() -> (Arc<Self>, impl Stream<Item = SessionEvent> + Send + Unpin) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(SessionEventQueue { tx }), ReceiverStream(rx))
    }
}

impl SessionListener for SessionEventQueue {
    fn on_configurations_selected(&self, configs: &[TechnologyConfig]) {
        let _ = self.tx.send(SessionEvent::ConfigurationsSelected(configs.to_vec()));
    }

    fn on_started(&self, peer: RangingDevice, technology: RangingTechnology) {
        let _ = self.tx.send(SessionEvent::Started { peer, technology });
    }

    fn on_ranging_data(&self, peer: RangingDevice, data: RangingData) {
        let _ = self.tx.send(SessionEvent::RangingData { peer, data });
    }

    fn on_stopped(&self, peer: RangingDevice, technology: RangingTechnology, reason: ClosedReason) {
        let _ = self.tx.send(SessionEvent::Stopped {
            peer,
            technology,
            reason,
        });
    }

    fn on_session_closed(&self, reason: SessionClosedReason) {
        let _ = self.tx.send(SessionEvent::SessionClosed(reason));
    }
}

/// Collects a fusion engine's emissions so the kernel can apply the
/// notification gate and measurement limit after `feed` returns.
struct EmissionBuffer(std::sync::Mutex<Vec<RangingData>>);

impl EmissionBuffer {
    fn new() -> Arc<Self> {
        Arc::new(EmissionBuffer(std::sync::Mutex::new(Vec::new())))
    }

    fn drain(&self) -> Vec<RangingData> {
        std::mem::take(&mut self.0.lock().unwrap())
    }
}

impl FusionListener for EmissionBuffer {
    fn on_fused_data(&self, data: RangingData) {
        self.0.lock().unwrap().push(data);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdapterState {
    Stopped,
    Started,
}

struct AdapterEntry {
    adapter: Arc<dyn RangingAdapter>,
    config: TechnologyConfig,
    state: AdapterState,
}

struct Peer {
    technologies: TechnologySet,
    fusion: Box<dyn FusionEngine>,
    emissions: Arc<EmissionBuffer>,
}

/// A multi-technology ranging session.
///
/// Created stopped; [`start`](Self::start) brings up one adapter per
/// selected configuration. Must be created inside a Tokio runtime: the
/// constructor spawns the session's event loop.
pub struct RangingSession {
    inner: Arc<Mutex<SessionInner>>,
    events_tx: mpsc::UnboundedSender<(AdapterId, AdapterEvent)>,
    timeout_tx: mpsc::UnboundedSender<u64>,
}

struct SessionInner {
    state: SessionState,
    config: SessionConfig,
    attribution: Option<AttributionSource>,
    factory: Arc<dyn AdapterFactory>,
    alarms: Arc<dyn AlarmScheduler>,
    background_timeout: Duration,
    listener: Arc<dyn SessionListener>,
    gate: NotificationGate,
    adapters: HashMap<AdapterId, AdapterEntry>,
    peers: HashMap<RangingDevice, Peer>,
    stop_overrides: HashMap<AdapterId, ClosedReason>,
    next_adapter_id: u64,
    background_alarm: Option<AlarmHandle>,
    // Bumped on every arm; a deadline firing with an older epoch lost a
    // cancellation race and must be discarded.
    alarm_epoch: u64,
    measurements_emitted: u32,
    final_reason: ClosedReason,
    closed_emitted: bool,
}

impl RangingSession {
    /// Creates a stopped session.
    ///
    /// `attribution` identifies a non-privileged calling app and enables the
    /// background policy; pass `None` for privileged callers.
    pub fn new(
        config: SessionConfig,
        attribution: Option<AttributionSource>,
        factory: Arc<dyn AdapterFactory>,
        alarms: Arc<dyn AlarmScheduler>,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        let gate = NotificationGate::new(config.notification_config);
        let inner = Arc::new(Mutex::new(SessionInner {
            state: SessionState::Stopped,
            config,
            attribution,
            factory,
            alarms,
            background_timeout: DEFAULT_BACKGROUND_TIMEOUT,
            listener,
            gate,
            adapters: HashMap::new(),
            peers: HashMap::new(),
            stop_overrides: HashMap::new(),
            next_adapter_id: 0,
            background_alarm: None,
            alarm_epoch: 0,
            measurements_emitted: 0,
            final_reason: ClosedReason::Unknown,
            closed_emitted: false,
        }));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (timeout_tx, mut timeout_rx) = mpsc::unbounded_channel();

        let loop_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events_rx.recv() => {
                        let Some((id, event)) = event else { break };
                        let followup = loop_inner.lock().await.handle_adapter_event(id, event);
                        followup.run().await;
                    }
                    fired = timeout_rx.recv() => {
                        let Some(epoch) = fired else { break };
                        let adapters = loop_inner.lock().await.on_background_deadline(epoch);
                        for adapter in adapters {
                            adapter.app_in_background_timeout().await;
                        }
                    }
                }
            }
        });

        RangingSession {
            inner,
            events_tx,
            timeout_tx,
        }
    }

    /// Overrides the background deadline (default
    /// [`DEFAULT_BACKGROUND_TIMEOUT`]).
    pub async fn set_background_timeout(&self, timeout: Duration) {
        self.inner.lock().await.background_timeout = timeout;
    }

    /// The current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// The technologies currently active for `device`.
    pub async fn peer_technologies(&self, device: RangingDevice) -> TechnologySet {
        self.inner
            .lock()
            .await
            .peers
            .get(&device)
            .map(|p| p.technologies.clone())
            .unwrap_or_default()
    }

    /// The devices currently participating in the session.
    pub async fn peers(&self) -> Vec<RangingDevice> {
        self.inner.lock().await.peers.keys().copied().collect()
    }

    /// Starts one adapter per configuration.
    ///
    /// Fails with [`InvalidState`](ErrorKind::InvalidState) unless the
    /// session is stopped, and with
    /// [`InvalidParameters`](ErrorKind::InvalidParameters) for an empty
    /// configuration set. An individual adapter failing to start closes only
    /// that adapter; the session closes when the last one is gone.
    pub async fn start(&self, configs: Vec<TechnologyConfig>) -> Result<()> {
        if configs.is_empty() {
            return Err(Error::new(ErrorKind::InvalidParameters, "no configurations to start"));
        }
        let (attribution, started) = {
            let mut inner = self.inner.lock().await;
            inner.listener.on_configurations_selected(&configs);
            if inner.state != SessionState::Stopped {
                // A start in the wrong state is a session-level invariant
                // violation: surface an internal error and close out.
                let state = inner.state;
                let to_stop = inner.begin_stop(ClosedReason::InternalError);
                drop(inner);
                for adapter in to_stop {
                    adapter.stop().await;
                }
                return Err(Error::new(
                    ErrorKind::InvalidState,
                    format!("cannot start a session in {state:?}"),
                ));
            }
            inner.state = SessionState::Starting;
            inner.closed_emitted = false;
            inner.measurements_emitted = 0;
            inner.final_reason = ClosedReason::Unknown;

            let mut started = Vec::new();
            for config in configs {
                let adapter = match inner.factory.create_adapter(&config) {
                    Ok(adapter) => adapter,
                    Err(e) => {
                        warn!("no adapter for {}: {e}", config.technology());
                        continue;
                    }
                };
                for device in config.peers() {
                    inner.ensure_peer(device);
                }
                let id = AdapterId(inner.next_adapter_id);
                inner.next_adapter_id += 1;
                let sender = AdapterEventSender::new(id, self.events_tx.clone());
                inner.adapters.insert(
                    id,
                    AdapterEntry {
                        adapter: Arc::clone(&adapter),
                        config: config.clone(),
                        state: AdapterState::Stopped,
                    },
                );
                started.push((adapter, config, sender));
            }
            if started.is_empty() {
                inner.state = SessionState::Stopped;
                for (_, mut peer) in std::mem::take(&mut inner.peers) {
                    peer.fusion.stop();
                }
                return Err(Error::new(ErrorKind::FailedToStart, "no adapter could be created"));
            }
            info!("session starting with {} adapters", started.len());
            (inner.attribution.clone(), started)
        };

        // Radio calls happen outside the lock; failures are folded back in
        // through the normal close path.
        for (adapter, config, sender) in started {
            if let Err(e) = adapter.start(config, attribution.clone(), sender.clone()).await {
                warn!("adapter failed to start: {e}");
                let reason = match e.kind {
                    ErrorKind::BackgroundPolicy => ClosedReason::BackgroundPolicy,
                    _ => ClosedReason::FailedToStart,
                };
                sender.send(AdapterEvent::Closed(reason));
            }
        }
        Ok(())
    }

    /// Stops the session on local request.
    pub async fn stop(&self) {
        self.stop_with_reason(ClosedReason::LocalRequest).await;
    }

    /// Stops the session, attributing the stop to `reason`.
    ///
    /// Idempotent: a session that is already stopping or stopped is left
    /// alone.
    pub async fn stop_with_reason(&self, reason: ClosedReason) {
        let to_stop = {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, SessionState::Stopped | SessionState::Stopping) {
                debug!("stop in {:?} ignored", inner.state);
                return;
            }
            inner.begin_stop(reason)
        };
        for adapter in to_stop {
            adapter.stop().await;
        }
    }

    /// Stops only the adapters driving `technologies`, attributing the stop
    /// to `reason`. The session itself keeps running until its last adapter
    /// closes.
    pub async fn stop_technologies(&self, technologies: &TechnologySet, reason: ClosedReason) {
        let to_stop = {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, SessionState::Stopped | SessionState::Stopping) {
                return;
            }
            let matching: Vec<AdapterId> = inner
                .adapters
                .iter()
                .filter(|(_, entry)| technologies.contains(entry.config.technology()))
                .map(|(id, _)| *id)
                .collect();
            let mut to_stop = Vec::new();
            for id in matching {
                if reason != ClosedReason::LocalRequest {
                    inner.stop_overrides.insert(id, reason);
                }
                to_stop.push(Arc::clone(&inner.adapters[&id].adapter));
            }
            to_stop
        };
        for adapter in to_stop {
            adapter.stop().await;
        }
    }

    /// Adds a peer to the running session, routed only to adapters that
    /// support dynamic peer updates.
    pub async fn add_peer(&self, config: TechnologyConfig) {
        let routed = {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Started {
                return;
            }
            let technology = config.technology();
            let routed: Vec<Arc<dyn RangingAdapter>> = inner
                .adapters
                .values()
                .filter(|e| e.config.technology() == technology && e.adapter.dynamic_update_peers_supported())
                .map(|e| Arc::clone(&e.adapter))
                .collect();
            if !routed.is_empty() {
                for device in config.peers() {
                    inner.ensure_peer(device);
                    inner.activate(device, technology);
                }
            }
            routed
        };
        for adapter in routed {
            adapter.add_peer(config.clone()).await;
        }
    }

    /// Removes a peer from the running session, routed only to adapters that
    /// support dynamic peer updates.
    pub async fn remove_peer(&self, device: RangingDevice) {
        let routed = {
            let inner = self.inner.lock().await;
            inner
                .adapters
                .values()
                .filter(|e| e.adapter.dynamic_update_peers_supported() && e.config.peers().contains(&device))
                .map(|e| Arc::clone(&e.adapter))
                .collect::<Vec<_>>()
        };
        for adapter in routed {
            adapter.remove_peer(device).await;
        }
    }

    /// Asks every adapter to skip `skip_count` rounds between measurements.
    pub async fn reconfigure_ranging_interval(&self, skip_count: u32) {
        let adapters: Vec<_> = {
            let inner = self.inner.lock().await;
            inner.adapters.values().map(|e| Arc::clone(&e.adapter)).collect()
        };
        for adapter in adapters {
            adapter.reconfigure_ranging_interval(skip_count).await;
        }
    }

    /// The calling app moved between foreground and background.
    ///
    /// Backgrounding an attributed app arms the background deadline and
    /// switches the notification gate to its background policy; returning to
    /// the foreground cancels the deadline and restores the gate.
    pub async fn app_foreground_state_updated(&self, in_foreground: bool) {
        let adapters: Vec<_> = {
            let mut inner = self.inner.lock().await;
            if in_foreground {
                inner.gate.app_to_foreground();
                if let Some(alarm) = inner.background_alarm.take() {
                    alarm.cancel();
                }
            } else {
                inner.gate.app_to_background();
                if inner.attribution.is_some() && inner.background_alarm.is_none() {
                    // An alarm that fires concurrently with its cancellation
                    // still queues a deadline message; the epoch lets the
                    // event loop tell such a stale firing from a live one.
                    inner.alarm_epoch += 1;
                    let epoch = inner.alarm_epoch;
                    let tx = self.timeout_tx.clone();
                    let alarm = inner.alarms.schedule(
                        inner.background_timeout,
                        Box::new(move || {
                            let _ = tx.send(epoch);
                        }),
                    );
                    inner.background_alarm = Some(alarm);
                }
            }
            inner.adapters.values().map(|e| Arc::clone(&e.adapter)).collect()
        };
        for adapter in adapters {
            adapter.app_foreground_state_updated(in_foreground).await;
        }
    }
}

/// Adapter work the event loop must do after releasing the session lock.
#[derive(Default)]
struct Followup {
    stop: Vec<Arc<dyn RangingAdapter>>,
}

impl Followup {
    async fn run(self) {
        for adapter in self.stop {
            adapter.stop().await;
        }
    }
}

impl SessionInner {
    fn ensure_peer(&mut self, device: RangingDevice) {
        if self.peers.contains_key(&device) {
            return;
        }
        let emissions = EmissionBuffer::new();
        let mut fusion: Box<dyn FusionEngine> = if self.config.sensor_fusion_enabled {
            Box::new(FilteringFusionEngine::new(
                self.config.angle_of_arrival_needed,
                Box::new(PreferentialFuser::default()),
            ))
        } else {
            Box::new(NoOpFusionEngine::new())
        };
        fusion.start(Arc::clone(&emissions) as Arc<dyn FusionListener>);
        self.peers.insert(
            device,
            Peer {
                technologies: TechnologySet::new(),
                fusion,
                emissions,
            },
        );
    }

    fn activate(&mut self, device: RangingDevice, technology: RangingTechnology) {
        if let Some(peer) = self.peers.get_mut(&device) {
            if peer.technologies.insert(technology) {
                peer.fusion.add_data_source(technology);
            }
        }
    }

    /// Deactivates a technology for a peer; drops the peer when its last
    /// technology goes.
    fn deactivate(&mut self, device: RangingDevice, technology: RangingTechnology) -> bool {
        let Some(peer) = self.peers.get_mut(&device) else {
            return false;
        };
        if !peer.technologies.remove(technology) {
            return false;
        }
        peer.fusion.remove_data_source(technology);
        if peer.technologies.is_empty() {
            let mut peer = self.peers.remove(&device).expect("peer just looked up");
            peer.fusion.stop();
            debug!("peer {device} left the session");
        }
        true
    }

    fn begin_stop(&mut self, reason: ClosedReason) -> Vec<Arc<dyn RangingAdapter>> {
        self.state = SessionState::Stopping;
        self.final_reason = reason;
        if let Some(alarm) = self.background_alarm.take() {
            alarm.cancel();
        }
        if self.adapters.is_empty() {
            self.finish_close();
            return Vec::new();
        }
        let ids: Vec<AdapterId> = self.adapters.keys().copied().collect();
        for id in ids {
            if reason != ClosedReason::LocalRequest {
                self.stop_overrides.insert(id, reason);
            }
        }
        self.adapters.values().map(|e| Arc::clone(&e.adapter)).collect()
    }

    fn finish_close(&mut self) {
        self.state = SessionState::Stopped;
        if let Some(alarm) = self.background_alarm.take() {
            alarm.cancel();
        }
        for (device, mut peer) in std::mem::take(&mut self.peers) {
            debug!("dropping peer {device} at session close");
            peer.fusion.stop();
        }
        self.stop_overrides.clear();
        if !self.closed_emitted {
            self.closed_emitted = true;
            let reason = SessionClosedReason::from(self.final_reason);
            info!("session closed: {reason}");
            self.listener.on_session_closed(reason);
        }
    }

    fn handle_adapter_event(&mut self, id: AdapterId, event: AdapterEvent) -> Followup {
        let mut followup = Followup::default();
        match event {
            AdapterEvent::Started(devices) => {
                let Some(entry) = self.adapters.get_mut(&id) else {
                    return followup;
                };
                if entry.state == AdapterState::Started {
                    warn!("duplicate started event from {:?} ignored", id);
                    return followup;
                }
                entry.state = AdapterState::Started;
                let technology = entry.config.technology();
                if self.state == SessionState::Starting {
                    self.state = SessionState::Started;
                }
                for device in devices {
                    self.ensure_peer(device);
                    self.activate(device, technology);
                    self.listener.on_started(device, technology);
                }
            }
            AdapterEvent::RangingData(device, data) => {
                if matches!(self.state, SessionState::Stopping | SessionState::Stopped) {
                    return followup;
                }
                let Some(peer) = self.peers.get_mut(&device) else {
                    debug!("measurement for unknown peer {device} dropped");
                    return followup;
                };
                peer.fusion.feed(data);
                let fused = peer.emissions.drain();
                for data in fused {
                    if !self.gate.should_emit(data.distance.value) {
                        continue;
                    }
                    self.measurements_emitted = self.measurements_emitted.saturating_add(1);
                    self.listener.on_ranging_data(device, data);
                    let limit = self.config.ranging_measurements_limit;
                    if limit != 0 && self.measurements_emitted >= limit {
                        info!("measurement limit {limit} reached, stopping session");
                        followup.stop = self.begin_stop(ClosedReason::LocalRequest);
                        return followup;
                    }
                }
            }
            AdapterEvent::Stopped(devices, reason) => {
                let Some(entry) = self.adapters.get(&id) else {
                    return followup;
                };
                let technology = entry.config.technology();
                let reason = self.stop_overrides.get(&id).copied().unwrap_or(reason);
                for device in devices {
                    if self.deactivate(device, technology) {
                        self.listener.on_stopped(device, technology, reason);
                    }
                }
            }
            AdapterEvent::Closed(reason) => {
                let Some(entry) = self.adapters.remove(&id) else {
                    return followup;
                };
                let technology = entry.config.technology();
                let reason = self.stop_overrides.remove(&id).unwrap_or(reason);
                // An adapter that dies without per-peer stop events still
                // releases its peers.
                for device in entry.config.peers() {
                    if self.deactivate(device, technology) {
                        self.listener.on_stopped(device, technology, reason);
                    }
                }
                if self.state != SessionState::Stopping {
                    self.final_reason = reason;
                }
                debug!("adapter for {technology} closed: {reason}");
                if self.adapters.is_empty() {
                    self.finish_close();
                }
            }
        }
        followup
    }

    fn on_background_deadline(&mut self, epoch: u64) -> Vec<Arc<dyn RangingAdapter>> {
        // A firing that lost the race against a foreground transition (or
        // belongs to an alarm that was since cancelled and re-armed) carries
        // a stale epoch or finds no alarm armed at all.
        if self.background_alarm.is_none() || epoch != self.alarm_epoch {
            debug!("stale background deadline (epoch {epoch}) discarded");
            return Vec::new();
        }
        self.background_alarm = None;
        if matches!(self.state, SessionState::Stopped | SessionState::Stopping) {
            return Vec::new();
        }
        info!("background deadline hit, notifying adapters");
        self.adapters.values().map(|e| Arc::clone(&e.adapter)).collect()
    }
}
