//! Session kernel lifecycle scenarios with scripted adapters.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockAdapterFactory;
use futures_lite::StreamExt;
use ranging::config::{
    AttributionSource, NotificationConfig, RssiRangingParams, SessionConfig, TechnologyConfig, TechnologyParams,
    UwbRangingParams,
};
use ranging::error::ClosedReason;
use ranging::session::{
    AlarmScheduler, RangingSession, SessionEvent, SessionEventQueue, SessionState, TokioAlarmScheduler,
};
use ranging::{
    AdapterEvent, Confidence, DeviceRole, Measurement, RangingData, RangingDevice, RangingTechnology,
    SessionClosedReason,
};

fn uwb_config(peer: RangingDevice) -> TechnologyConfig {
    use ranging::config::{CountryCode, UwbConfigId, UwbDeviceMode};
    TechnologyConfig::Unicast {
        role: DeviceRole::Initiator,
        peer,
        params: TechnologyParams::Uwb(UwbRangingParams {
            session_id: 7,
            config_id: UwbConfigId::UnicastDsTwr,
            channel: 9,
            preamble_index: 26,
            ranging_interval_ms: 120,
            slot_duration_ms: 2,
            session_key: vec![0; 8],
            local_address: [1, 2].into(),
            peer_address: [3, 4].into(),
            country_code: CountryCode::try_from("US").unwrap(),
            device_mode: UwbDeviceMode::Controller,
        }),
    }
}

fn rssi_config(peer: RangingDevice) -> TechnologyConfig {
    TechnologyConfig::Unicast {
        role: DeviceRole::Initiator,
        peer,
        params: TechnologyParams::Rssi(RssiRangingParams {
            service_name: "rssi_ranging0001".into(),
            interval_ms: 500,
        }),
    }
}

fn measurement(technology: RangingTechnology, timestamp_ms: u64, distance: f64) -> RangingData {
    RangingData::distance_only(technology, timestamp_ms, Measurement::new(distance, Confidence::High))
}

struct Harness {
    session: Arc<RangingSession>,
    factory: Arc<MockAdapterFactory>,
    events: Box<dyn futures_core::Stream<Item = SessionEvent> + Send + Unpin>,
}

fn harness_with_alarms(
    config: SessionConfig,
    attribution: Option<AttributionSource>,
    alarms: Arc<dyn AlarmScheduler>,
) -> Harness {
    common::init_tracing();
    let factory = MockAdapterFactory::new();
    let (listener, events) = SessionEventQueue::new();
    let session = Arc::new(RangingSession::new(config, attribution, factory.clone(), alarms, listener));
    Harness {
        session,
        factory,
        events: Box::new(events),
    }
}

fn harness_with(config: SessionConfig, attribution: Option<AttributionSource>) -> Harness {
    harness_with_alarms(config, attribution, Arc::new(TokioAlarmScheduler))
}

fn harness() -> Harness {
    harness_with(SessionConfig::default(), None)
}

impl Harness {
    async fn next_event(&mut self) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.next())
            .await
            .expect("timed out waiting for a session event")
            .expect("event stream ended")
    }

    /// Drains events until the session reports closed, returning everything
    /// observed including the close.
    async fn drain_until_closed(&mut self) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = matches!(event, SessionEvent::SessionClosed(_));
            seen.push(event);
            if done {
                return seen;
            }
        }
    }
}

#[tokio::test]
async fn close_ordering_with_two_adapters() {
    let mut h = harness();
    let peer = RangingDevice::random();
    h.session.start(vec![uwb_config(peer), rssi_config(peer)]).await.unwrap();

    assert!(matches!(h.next_event().await, SessionEvent::ConfigurationsSelected(c) if c.len() == 2));
    assert!(matches!(h.next_event().await, SessionEvent::Started { .. }));
    assert!(matches!(h.next_event().await, SessionEvent::Started { .. }));
    assert_eq!(h.session.state().await, SessionState::Started);

    h.session.stop().await;
    let events = h.drain_until_closed().await;

    let stops = events.iter().filter(|e| matches!(e, SessionEvent::Stopped { .. })).count();
    assert_eq!(stops, 2);
    let closes: Vec<_> = events.iter().filter(|e| matches!(e, SessionEvent::SessionClosed(_))).collect();
    assert_eq!(closes.len(), 1);
    assert!(matches!(events.last().unwrap(), SessionEvent::SessionClosed(SessionClosedReason::LocalRequest)));
    assert_eq!(h.session.state().await, SessionState::Stopped);

    // Idempotent stop: no second close event, state unchanged.
    h.session.stop().await;
    assert_eq!(h.session.state().await, SessionState::Stopped);
}

#[tokio::test]
async fn peer_leaves_exactly_when_its_last_technology_stops() {
    let mut h = harness();
    let peer = RangingDevice::random();
    h.session.start(vec![uwb_config(peer), rssi_config(peer)]).await.unwrap();
    let _ = h.next_event().await; // configurations
    let _ = h.next_event().await; // started
    let _ = h.next_event().await; // started

    let uwb_only = [RangingTechnology::Uwb].into_iter().collect();
    h.session.stop_technologies(&uwb_only, ClosedReason::RemoteRequest).await;
    common::wait_until(Duration::from_secs(5), || {
        let session = h.session.clone();
        async move { session.peer_technologies(peer).await.len() == 1 }
    })
    .await;
    assert_eq!(h.session.peers().await, vec![peer]);
    assert_eq!(h.session.state().await, SessionState::Started);

    let rssi_only = [RangingTechnology::Rssi].into_iter().collect();
    h.session.stop_technologies(&rssi_only, ClosedReason::RemoteRequest).await;
    let events = h.drain_until_closed().await;
    assert!(h.session.peers().await.is_empty());
    // The remote-request override propagates into the stop notifications.
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Stopped {
            reason: ClosedReason::RemoteRequest,
            ..
        }
    )));
    assert_eq!(h.session.state().await, SessionState::Stopped);
}

#[tokio::test]
async fn ranging_data_flows_through_fusion_to_the_listener() {
    let mut h = harness();
    let peer = RangingDevice::random();
    h.session.start(vec![uwb_config(peer)]).await.unwrap();
    let _ = h.next_event().await;
    let _ = h.next_event().await;

    let adapter = h.factory.adapter_for(RangingTechnology::Uwb);
    adapter.emit(AdapterEvent::RangingData(peer, measurement(RangingTechnology::Uwb, 10, 2.0)));
    match h.next_event().await {
        SessionEvent::RangingData { peer: device, data } => {
            assert_eq!(device, peer);
            assert_eq!(data.distance.value, 2.0);
            assert_eq!(data.timestamp_ms, 10);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn data_after_stop_is_dropped() {
    let mut h = harness();
    let peer = RangingDevice::random();
    h.session.start(vec![uwb_config(peer)]).await.unwrap();
    let adapter = h.factory.adapter_for(RangingTechnology::Uwb);

    h.session.stop().await;
    let events = h.drain_until_closed().await;
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::RangingData { .. })));

    // The adapter already closed; anything else it reports is discarded.
    adapter.emit(AdapterEvent::RangingData(peer, measurement(RangingTechnology::Uwb, 50, 1.0)));
    h.session.stop().await;
    assert_eq!(h.session.state().await, SessionState::Stopped);
}

#[tokio::test]
async fn measurement_limit_stops_the_session() {
    let config = SessionConfig {
        ranging_measurements_limit: 2,
        ..SessionConfig::default()
    };
    let mut h = harness_with(config, None);
    let peer = RangingDevice::random();
    h.session.start(vec![uwb_config(peer)]).await.unwrap();
    let _ = h.next_event().await;
    let _ = h.next_event().await;

    let adapter = h.factory.adapter_for(RangingTechnology::Uwb);
    for t in 0..5u64 {
        adapter.emit(AdapterEvent::RangingData(peer, measurement(RangingTechnology::Uwb, t * 100, 2.0)));
    }
    let events = h.drain_until_closed().await;
    let data = events.iter().filter(|e| matches!(e, SessionEvent::RangingData { .. })).count();
    assert_eq!(data, 2);
    assert!(matches!(events.last().unwrap(), SessionEvent::SessionClosed(SessionClosedReason::LocalRequest)));
}

#[tokio::test]
async fn disabled_notifications_suppress_data() {
    let config = SessionConfig {
        notification_config: NotificationConfig::disable(),
        ..SessionConfig::default()
    };
    let mut h = harness_with(config, None);
    let peer = RangingDevice::random();
    h.session.start(vec![uwb_config(peer)]).await.unwrap();
    let _ = h.next_event().await;
    let _ = h.next_event().await;

    let adapter = h.factory.adapter_for(RangingTechnology::Uwb);
    adapter.emit(AdapterEvent::RangingData(peer, measurement(RangingTechnology::Uwb, 10, 2.0)));
    h.session.stop().await;
    let events = h.drain_until_closed().await;
    assert!(!events.iter().any(|e| matches!(e, SessionEvent::RangingData { .. })));
}

#[tokio::test]
async fn failed_adapter_start_closes_the_session_as_unsupported() {
    let h = harness();
    h.factory.fail_start.lock().unwrap().push(RangingTechnology::Uwb);
    let mut h = h;
    let peer = RangingDevice::random();
    h.session.start(vec![uwb_config(peer)]).await.unwrap();
    let events = h.drain_until_closed().await;
    assert!(matches!(events.last().unwrap(), SessionEvent::SessionClosed(SessionClosedReason::Unsupported)));
    assert_eq!(h.session.state().await, SessionState::Stopped);
}

#[tokio::test]
async fn one_failing_adapter_leaves_the_other_running() {
    let h = harness();
    h.factory.fail_start.lock().unwrap().push(RangingTechnology::Rssi);
    let mut h = h;
    let peer = RangingDevice::random();
    h.session.start(vec![uwb_config(peer), rssi_config(peer)]).await.unwrap();

    common::wait_until(Duration::from_secs(5), || {
        let session = h.session.clone();
        async move { session.state().await == SessionState::Started }
    })
    .await;
    // Only the UWB adapter survives; the session stays up.
    assert_eq!(h.session.peer_technologies(peer).await.len(), 1);

    h.session.stop().await;
    let events = h.drain_until_closed().await;
    assert!(matches!(events.last().unwrap(), SessionEvent::SessionClosed(SessionClosedReason::LocalRequest)));
}

#[tokio::test(start_paused = true)]
async fn background_deadline_notifies_adapters() {
    let attribution = AttributionSource {
        uid: 10001,
        package_name: "com.example.app".into(),
    };
    let mut h = harness_with(SessionConfig::default(), Some(attribution));
    let peer = RangingDevice::random();
    h.session.start(vec![uwb_config(peer)]).await.unwrap();
    let _ = h.next_event().await;
    let _ = h.next_event().await;
    let adapter = h.factory.adapter_for(RangingTechnology::Uwb);

    h.session.app_foreground_state_updated(false).await;
    tokio::time::sleep(Duration::from_secs(61)).await;
    common::wait_until(Duration::from_secs(5), || {
        let adapter = adapter.clone();
        async move { adapter.background_timeouts.load(std::sync::atomic::Ordering::SeqCst) == 1 }
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn returning_to_foreground_cancels_the_deadline() {
    let attribution = AttributionSource {
        uid: 10001,
        package_name: "com.example.app".into(),
    };
    let mut h = harness_with(SessionConfig::default(), Some(attribution));
    let peer = RangingDevice::random();
    h.session.start(vec![uwb_config(peer)]).await.unwrap();
    let _ = h.next_event().await;
    let _ = h.next_event().await;
    let adapter = h.factory.adapter_for(RangingTechnology::Uwb);

    h.session.app_foreground_state_updated(false).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    h.session.app_foreground_state_updated(true).await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(adapter.background_timeouts.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_that_lost_the_cancellation_race_is_discarded() {
    let attribution = AttributionSource {
        uid: 10001,
        package_name: "com.example.app".into(),
    };
    let alarms = common::ManualAlarmScheduler::new();
    let mut h = harness_with_alarms(SessionConfig::default(), Some(attribution), alarms.clone());
    let peer = RangingDevice::random();
    h.session.start(vec![uwb_config(peer)]).await.unwrap();
    let _ = h.next_event().await;
    let _ = h.next_event().await;
    let adapter = h.factory.adapter_for(RangingTechnology::Uwb);
    let timeouts = || adapter.background_timeouts.load(std::sync::atomic::Ordering::SeqCst);

    // First alarm is cancelled by the foreground transition, but a second
    // background entry re-arms before the first timer's message lands: the
    // stale firing must not reach the adapters.
    h.session.app_foreground_state_updated(false).await;
    h.session.app_foreground_state_updated(true).await;
    h.session.app_foreground_state_updated(false).await;
    alarms.fire_next();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(timeouts(), 0);

    // A firing that arrives after its alarm was cancelled outright (no
    // re-arm) is discarded too.
    h.session.app_foreground_state_updated(true).await;
    alarms.fire_next();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(timeouts(), 0);

    // A live alarm still gets through.
    h.session.app_foreground_state_updated(false).await;
    alarms.fire_next();
    common::wait_until(Duration::from_secs(5), || {
        let adapter = adapter.clone();
        async move { adapter.background_timeouts.load(std::sync::atomic::Ordering::SeqCst) == 1 }
    })
    .await;
}

#[tokio::test]
async fn reconfigure_is_forwarded_to_every_adapter() {
    let mut h = harness();
    let peer = RangingDevice::random();
    h.session.start(vec![uwb_config(peer), rssi_config(peer)]).await.unwrap();
    let _ = h.next_event().await;
    let _ = h.next_event().await;
    let _ = h.next_event().await;

    h.session.reconfigure_ranging_interval(3).await;
    for adapter in h.factory.adapters() {
        assert_eq!(adapter.reconfigures.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
