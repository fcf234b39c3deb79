//! The contract every technology adapter implements.
//!
//! An adapter translates between the session kernel and one radio backend
//! (the UWB controller, the Wi-Fi RTT service, the BT Channel Sounding or
//! BLE stack). The kernel owns its adapters; adapters own their backend
//! clients and must release them when they close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::{AttributionSource, TechnologyConfig};
use crate::device::RangingDevice;
use crate::error::ClosedReason;
use crate::technology::RangingTechnology;
use crate::{RangingData, Result};

/// Identifies one adapter instance within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterId(pub(crate) u64);

/// Events an adapter reports to its session.
///
/// Per adapter the order is fixed: one `Started`, then any number of
/// `RangingData` interleaved with per-peer `Stopped` events, then exactly one
/// terminal `Closed`. Nothing may follow `Closed`; the
/// [`AdapterEventSender`] enforces this.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// Ranging began for these peers
    Started(Vec<RangingDevice>),
    /// A fresh measurement for one peer
    RangingData(RangingDevice, RangingData),
    /// Ranging ended for these peers, others may continue
    Stopped(Vec<RangingDevice>, ClosedReason),
    /// The adapter released its backend and will report nothing further
    Closed(ClosedReason),
}

/// An adapter's handle for reporting events into its session.
///
/// Cloneable into backend callback contexts. Sending must never block;
/// events are committed to the session's state by the session event loop.
#[derive(Clone)]
pub struct AdapterEventSender {
    adapter: AdapterId,
    tx: mpsc::UnboundedSender<(AdapterId, AdapterEvent)>,
    closed: Arc<AtomicBool>,
}

impl AdapterEventSender {
    pub(crate) fn new(adapter: AdapterId, tx: mpsc::UnboundedSender<(AdapterId, AdapterEvent)>) -> Self {
        AdapterEventSender {
            adapter,
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reports one event. Events after `Closed` are dropped.
    pub fn send(&self, event: AdapterEvent) {
        if self.closed.load(Ordering::Acquire) {
            warn!("adapter {:?} reported an event after closing", self.adapter);
            return;
        }
        if matches!(event, AdapterEvent::Closed(_)) {
            self.closed.store(true, Ordering::Release);
        }
        // The session outlives its adapters; a dropped receiver only happens
        // during teardown, when the event no longer matters.
        let _ = self.tx.send((self.adapter, event));
    }
}

/// A technology driver the session kernel can own.
///
/// # Background policy
///
/// When `start` is given a non-privileged attribution and the calling app is
/// not in the foreground, the adapter must either apply the background
/// variant of its data-notification gate (see
/// [`NotificationGate::app_to_background`](crate::gate::NotificationGate::app_to_background))
/// or, when the technology cannot range in the background at all, refuse to
/// start with [`BackgroundPolicy`](crate::ErrorKind::BackgroundPolicy).
#[async_trait]
pub trait RangingAdapter: Send + Sync {
    /// The technology this adapter drives.
    fn technology(&self) -> RangingTechnology;

    /// Whether peers can be added and removed while ranging.
    fn dynamic_update_peers_supported(&self) -> bool {
        false
    }

    /// Starts ranging with `config`, reporting through `events`.
    ///
    /// Valid only while stopped; a second `start` fails with
    /// [`FailedToStart`](crate::ErrorKind::FailedToStart). A successful start
    /// guarantees an eventual terminal [`AdapterEvent::Closed`].
    async fn start(
        &self,
        config: TechnologyConfig,
        attribution: Option<AttributionSource>,
        events: AdapterEventSender,
    ) -> Result<()>;

    /// Stops ranging. Idempotent; the terminal [`AdapterEvent::Closed`] is
    /// still reported, exactly once.
    async fn stop(&self);

    /// Adds a peer to the running session. No-op unless
    /// [`dynamic_update_peers_supported`](Self::dynamic_update_peers_supported).
    async fn add_peer(&self, config: TechnologyConfig);

    /// Removes a peer from the running session. No-op unless
    /// [`dynamic_update_peers_supported`](Self::dynamic_update_peers_supported).
    async fn remove_peer(&self, device: RangingDevice);

    /// Asks the backend to skip `skip_count` ranging rounds between
    /// measurements. Best-effort.
    async fn reconfigure_ranging_interval(&self, skip_count: u32);

    /// The calling app moved between foreground and background.
    async fn app_foreground_state_updated(&self, in_foreground: bool);

    /// The app has been in the background past the session deadline. The
    /// adapter may stop itself if its technology forbids background ranging.
    async fn app_in_background_timeout(&self);
}

/// Creates adapters for selected configurations; supplied by the embedder.
pub trait AdapterFactory: Send + Sync {
    /// Creates an adapter able to drive `config`.
    fn create_adapter(&self, config: &TechnologyConfig) -> Result<Arc<dyn RangingAdapter>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_drops_events_after_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = AdapterEventSender::new(AdapterId(1), tx);
        sender.send(AdapterEvent::Started(vec![]));
        sender.send(AdapterEvent::Closed(ClosedReason::LocalRequest));
        sender.send(AdapterEvent::Started(vec![]));
        sender.send(AdapterEvent::Closed(ClosedReason::LocalRequest));

        let mut events = Vec::new();
        while let Ok((_, event)) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AdapterEvent::Started(_)));
        assert!(matches!(events[1], AdapterEvent::Closed(ClosedReason::LocalRequest)));
    }

    #[tokio::test]
    async fn clones_share_the_closed_latch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = AdapterEventSender::new(AdapterId(2), tx);
        let clone = sender.clone();
        clone.send(AdapterEvent::Closed(ClosedReason::Unknown));
        sender.send(AdapterEvent::Started(vec![]));
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
