#![allow(dead_code)] // each test binary uses a subset of these helpers

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use ranging::capabilities::{AvailabilityEvent, Capabilities, CapabilitiesProvider, UwbCapabilities};
use ranging::config::{CountryCode, TechnologyConfig, UwbConfigId};
use ranging::error::{ClosedReason, Error, ErrorKind};
use ranging::oob::{OobConnection, OobConnector};
use ranging::session::{AlarmHandle, AlarmScheduler};
use ranging::{
    AdapterEvent, AdapterEventSender, AdapterFactory, DeviceRole, RangingAdapter, RangingDevice, RangingTechnology,
    Result,
};
use tokio::sync::{mpsc, watch};

/// Installs the test log subscriber once per process; `RUST_LOG` filters.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A scriptable adapter that reports `Started` for its configured peers as
/// soon as it starts and answers `stop` with `Stopped` + `Closed`.
pub struct MockAdapter {
    technology: RangingTechnology,
    fail_start: bool,
    inner: Mutex<MockAdapterState>,
    pub background_timeouts: AtomicU32,
    pub reconfigures: AtomicU32,
}

#[derive(Default)]
struct MockAdapterState {
    sender: Option<AdapterEventSender>,
    config: Option<TechnologyConfig>,
    peers: Vec<RangingDevice>,
}

impl MockAdapter {
    pub fn new(technology: RangingTechnology, fail_start: bool) -> Arc<Self> {
        Arc::new(MockAdapter {
            technology,
            fail_start,
            inner: Mutex::new(MockAdapterState::default()),
            background_timeouts: AtomicU32::new(0),
            reconfigures: AtomicU32::new(0),
        })
    }

    /// The config this adapter was started with.
    pub fn config(&self) -> Option<TechnologyConfig> {
        self.inner.lock().unwrap().config.clone()
    }

    /// Reports an event as if the radio produced it.
    pub fn emit(&self, event: AdapterEvent) {
        let sender = self.inner.lock().unwrap().sender.clone();
        sender.expect("adapter not started").send(event);
    }

    pub fn peers(&self) -> Vec<RangingDevice> {
        self.inner.lock().unwrap().peers.clone()
    }
}

#[async_trait]
impl RangingAdapter for MockAdapter {
    fn technology(&self) -> RangingTechnology {
        self.technology
    }

    fn dynamic_update_peers_supported(&self) -> bool {
        true
    }

    async fn start(
        &self,
        config: TechnologyConfig,
        _attribution: Option<ranging::config::AttributionSource>,
        events: AdapterEventSender,
    ) -> Result<()> {
        if self.fail_start {
            return Err(Error::new(ErrorKind::FailedToStart, "mock start failure"));
        }
        let peers = config.peers();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.sender = Some(events.clone());
            inner.config = Some(config);
            inner.peers = peers.clone();
        }
        events.send(AdapterEvent::Started(peers));
        Ok(())
    }

    async fn stop(&self) {
        let (sender, peers) = {
            let inner = self.inner.lock().unwrap();
            (inner.sender.clone(), inner.peers.clone())
        };
        if let Some(sender) = sender {
            sender.send(AdapterEvent::Stopped(peers, ClosedReason::LocalRequest));
            sender.send(AdapterEvent::Closed(ClosedReason::LocalRequest));
        }
    }

    async fn add_peer(&self, config: TechnologyConfig) {
        let mut inner = self.inner.lock().unwrap();
        inner.peers.extend(config.peers());
    }

    async fn remove_peer(&self, device: RangingDevice) {
        let mut inner = self.inner.lock().unwrap();
        inner.peers.retain(|p| *p != device);
    }

    async fn reconfigure_ranging_interval(&self, _skip_count: u32) {
        self.reconfigures.fetch_add(1, Ordering::SeqCst);
    }

    async fn app_foreground_state_updated(&self, _in_foreground: bool) {}

    async fn app_in_background_timeout(&self) {
        self.background_timeouts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out [`MockAdapter`]s and remembers them so tests can drive them.
#[derive(Default)]
pub struct MockAdapterFactory {
    pub created: Mutex<Vec<Arc<MockAdapter>>>,
    pub fail_start: Mutex<Vec<RangingTechnology>>,
}

impl MockAdapterFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn adapters(&self) -> Vec<Arc<MockAdapter>> {
        self.created.lock().unwrap().clone()
    }

    pub fn adapter_for(&self, technology: RangingTechnology) -> Arc<MockAdapter> {
        self.adapters()
            .into_iter()
            .find(|a| a.technology() == technology)
            .expect("no adapter created for technology")
    }
}

impl AdapterFactory for MockAdapterFactory {
    fn create_adapter(&self, config: &TechnologyConfig) -> Result<Arc<dyn RangingAdapter>> {
        let fail = self.fail_start.lock().unwrap().contains(&config.technology());
        let adapter = MockAdapter::new(config.technology(), fail);
        self.created.lock().unwrap().push(Arc::clone(&adapter));
        Ok(adapter)
    }
}

/// An [`AlarmScheduler`] whose alarms fire only when the test says so and
/// whose cancellation is a no-op, mimicking a timer task that already ran
/// its closure before an abort could land.
#[derive(Default)]
pub struct ManualAlarmScheduler {
    alarms: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl ManualAlarmScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fires the oldest scheduled alarm.
    pub fn fire_next(&self) {
        let next = {
            let mut alarms = self.alarms.lock().unwrap();
            if alarms.is_empty() {
                None
            } else {
                Some(alarms.remove(0))
            }
        };
        next.expect("no alarm scheduled")();
    }
}

impl AlarmScheduler for ManualAlarmScheduler {
    fn schedule(&self, _delay: Duration, alarm: Box<dyn FnOnce() + Send>) -> AlarmHandle {
        self.alarms.lock().unwrap().push(alarm);
        AlarmHandle::new(|| {})
    }
}

/// A provider with fixed capabilities and no availability changes.
pub struct StaticCapabilities(pub Capabilities);

struct NoEvents;

impl Stream for NoEvents {
    type Item = AvailabilityEvent;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<AvailabilityEvent>> {
        Poll::Pending
    }
}

#[async_trait]
impl CapabilitiesProvider for StaticCapabilities {
    async fn capabilities(&self) -> Result<Capabilities> {
        Ok(self.0.clone())
    }

    async fn availability_events(&self) -> Result<Pin<Box<dyn Stream<Item = AvailabilityEvent> + Send>>> {
        Ok(Box::pin(NoEvents))
    }
}

/// Scenario capabilities: the initiator side supports channels {5, 9},
/// preambles {25, 26, 32}, config ids {1..4}, min interval 96 ms.
pub fn initiator_uwb_capabilities() -> Capabilities {
    Capabilities {
        uwb: Some(UwbCapabilities {
            supported_channels: [5, 9].into(),
            supported_preamble_indexes: [25, 26, 32].into(),
            supported_config_ids: [
                UwbConfigId::UnicastDsTwr,
                UwbConfigId::MulticastDsTwr,
                UwbConfigId::UnicastDsTwrNoAoa,
                UwbConfigId::ProvisionedUnicastDsTwr,
            ]
            .into(),
            min_ranging_interval_ms: 96,
            min_slot_duration_ms: 2,
            supported_roles: [DeviceRole::Initiator, DeviceRole::Responder].into(),
            country_code: CountryCode::try_from("US").unwrap(),
            background_ranging_supported: true,
        }),
        ..Default::default()
    }
}

/// Scenario capabilities: the responder side supports channel {9},
/// preambles {11, 26}, config ids {1, 2}, min interval 120 ms.
pub fn responder_uwb_capabilities() -> Capabilities {
    let mut caps = initiator_uwb_capabilities();
    let uwb = caps.uwb.as_mut().unwrap();
    uwb.supported_channels = [9].into();
    uwb.supported_preamble_indexes = [11, 26].into();
    uwb.supported_config_ids = [UwbConfigId::UnicastDsTwr, UwbConfigId::MulticastDsTwr].into();
    uwb.min_ranging_interval_ms = 120;
    caps
}

/// One end of an in-memory framed duplex link.
pub struct DuplexConnection {
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: watch::Sender<bool>,
}

/// Creates the two ends of a reliable in-memory link.
pub fn duplex_pair() -> (DuplexConnection, DuplexConnection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let a = DuplexConnection {
        tx: Mutex::new(Some(b_tx)),
        rx: tokio::sync::Mutex::new(a_rx),
        closed: watch::channel(false).0,
    };
    let b = DuplexConnection {
        tx: Mutex::new(Some(a_tx)),
        rx: tokio::sync::Mutex::new(b_rx),
        closed: watch::channel(false).0,
    };
    (a, b)
}

fn lost() -> Error {
    Error::new(ErrorKind::LostConnection, "connection closed")
}

#[async_trait]
impl OobConnection for DuplexConnection {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        let tx = self.tx.lock().unwrap().clone();
        tx.ok_or_else(lost)?.send(bytes.to_vec()).map_err(|_| lost())
    }

    async fn receive(&self) -> Result<Vec<u8>> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(lost());
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            message = rx.recv() => message.ok_or_else(lost),
            _ = closed.wait_for(|c| *c) => Err(lost()),
        }
    }

    async fn close(&self) {
        self.closed.send_replace(true);
        self.tx.lock().unwrap().take();
    }
}

/// A connector handing out pre-wired connections.
#[derive(Default)]
pub struct MockConnector {
    connections: Mutex<HashMap<RangingDevice, Box<dyn OobConnection>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn wire(&self, device: RangingDevice, connection: impl OobConnection + 'static) {
        self.connections.lock().unwrap().insert(device, Box::new(connection));
    }
}

#[async_trait]
impl OobConnector for MockConnector {
    async fn connect(&self, device: &RangingDevice) -> Result<Box<dyn OobConnection>> {
        self.connections
            .lock()
            .unwrap()
            .remove(device)
            .ok_or_else(|| Error::new(ErrorKind::NoPeersFound, format!("no route to {device}")))
    }
}

/// Polls `predicate` until it holds or `deadline` passes. Works under both
/// real and paused time.
pub async fn wait_until<F, Fut>(deadline: Duration, mut predicate: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let result = tokio::time::timeout(deadline, async {
        while !predicate().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    result.expect("condition not reached before deadline");
}
