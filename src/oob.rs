//! The out-of-band configuration protocol.
//!
//! Before any radio starts ranging, the initiator negotiates a common
//! configuration with each peer over a reliable, framed, bidirectional byte
//! transport (typically a BLE GATT link owned by the embedder). This module
//! holds the [wire codecs](message) for that protocol, the
//! [transport contract](OobConnection), and the
//! [initiator](OobInitiatorSession) / [responder](OobResponderSession)
//! drivers for the handshake itself.

pub mod message;

mod connection;
mod initiator;
mod responder;

pub use connection::{OobConnection, OobConnector, DEFAULT_OOB_TIMEOUT};
pub use initiator::OobInitiatorSession;
pub use responder::OobResponderSession;
