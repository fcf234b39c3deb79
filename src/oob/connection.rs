//! The per-peer OOB transport contract.
//!
//! The embedder supplies the actual byte transport (typically a BLE GATT
//! link). The core assumes it is reliable, framed, and bidirectional: one
//! `send` delivers one whole message, one `receive` yields one whole message.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::device::RangingDevice;
use crate::oob::message::OobMessage;
use crate::{Error, ErrorKind, Result};

/// Deadline applied to every OOB send and receive.
pub const DEFAULT_OOB_TIMEOUT: Duration = Duration::from_secs(4);

/// A reliable, framed, bidirectional byte-message link to one peer.
#[async_trait]
pub trait OobConnection: Send + Sync {
    /// Sends one framed message.
    async fn send(&self, bytes: &[u8]) -> Result<()>;

    /// Receives the next framed message.
    async fn receive(&self) -> Result<Vec<u8>>;

    /// Closes the link. Pending sends and receives fail with
    /// [`LostConnection`](ErrorKind::LostConnection).
    async fn close(&self);
}

/// Opens OOB connections to peers; implemented by the embedder's OOB
/// controller.
#[async_trait]
pub trait OobConnector: Send + Sync {
    /// Opens a connection to `device`.
    async fn connect(&self, device: &RangingDevice) -> Result<Box<dyn OobConnection>>;
}

/// One peer's connection together with the timeout discipline every
/// handshake step must follow.
pub(crate) struct PeerLink {
    pub(crate) device: RangingDevice,
    connection: Box<dyn OobConnection>,
    timeout: Duration,
}

impl PeerLink {
    pub(crate) fn new(device: RangingDevice, connection: Box<dyn OobConnection>, timeout: Duration) -> Self {
        PeerLink {
            device,
            connection,
            timeout,
        }
    }

    /// Sends `message`, bounded by the link timeout.
    pub(crate) async fn send_message(&self, message: &OobMessage) -> Result<()> {
        let bytes = message.serialize();
        tokio::time::timeout(self.timeout, self.connection.send(&bytes))
            .await
            .map_err(|_| Error::new(ErrorKind::Timeout, format!("send to {} timed out", self.device)))?
    }

    /// Receives and parses the next message with no deadline, for listen
    /// loops that wait on the peer's initiative.
    pub(crate) async fn receive_message_untimed(&self) -> Result<OobMessage> {
        let bytes = self.connection.receive().await?;
        OobMessage::parse(&bytes)
    }

    /// Receives messages until one matches `accept`, bounded overall by the
    /// link timeout. Unmatched messages are logged and discarded.
    pub(crate) async fn receive_matching<T>(&self, accept: impl Fn(OobMessage) -> Option<T> + Send) -> Result<T> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            let bytes = tokio::time::timeout_at(deadline, self.connection.receive())
                .await
                .map_err(|_| Error::new(ErrorKind::Timeout, format!("receive from {} timed out", self.device)))??;
            match OobMessage::parse(&bytes).map(&accept) {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => warn!("discarding unexpected oob message from {}", self.device),
                Err(e) => return Err(e),
            }
        }
    }

    pub(crate) async fn close(&self) {
        self.connection.close().await;
    }
}
