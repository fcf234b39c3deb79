//! Error types and the session close-reason taxonomy.

/// An error from a ranging operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Error {
    /// The machine-readable category of the error
    pub kind: ErrorKind,
    /// Additional human-readable context, possibly empty
    pub message: String,
}

impl Error {
    /// Creates an error with a context message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    /// Creates a [`MalformedMessage`](ErrorKind::MalformedMessage) error naming the offending field.
    pub fn malformed(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::MalformedMessage, message)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", &self.kind)
        } else {
            write!(f, "{}: {}", &self.kind, &self.message)
        }
    }
}

impl std::error::Error for Error {}

/// Categories of ranging errors.
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// a received message violates the wire format
    MalformedMessage,
    /// invalid parameters for a ranging operation
    InvalidParameters,
    /// the operation is not supported by the local device
    Unsupported,
    /// no configuration satisfies every participant
    PeerCapabilitiesMismatch,
    /// no reachable peers remain
    NoPeersFound,
    /// the operation timed out
    Timeout,
    /// the connection to the peer was lost
    LostConnection,
    /// the ranging technology failed to start
    FailedToStart,
    /// background execution is not permitted for this technology
    BackgroundPolicy,
    /// the operation is not valid in the current session state
    InvalidState,
    /// internal error
    InternalError,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            kind,
            message: String::new(),
        }
    }
}

/// Why a technology, peer, or session stopped.
///
/// This is the internal taxonomy carried through adapter callbacks and the
/// session kernel. It maps onto the coarser client-visible
/// [`SessionClosedReason`] when the session finally closes.
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClosedReason {
    /// unknown
    Unknown,
    /// the local client requested the stop
    LocalRequest,
    /// the remote peer requested the stop
    RemoteRequest,
    /// a system policy forced the stop
    SystemPolicy,
    /// the technology failed to start
    FailedToStart,
    /// the configuration is unsupported locally
    Unsupported,
    /// no configuration satisfies every participant
    PeerCapabilitiesMismatch,
    /// no reachable peers remain
    NoPeersFound,
    /// the connection to the peer was lost
    LostConnection,
    /// background execution is not permitted
    BackgroundPolicy,
    /// internal error
    InternalError,
}

/// The client-visible reason a session closed.
#[derive(Debug, displaydoc::Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionClosedReason {
    /// unknown
    Unknown,
    /// closed on local request
    LocalRequest,
    /// the requested configuration is unsupported
    Unsupported,
    /// no peers were found
    NoPeersFound,
    /// closed by system policy
    SystemPolicy,
}

impl From<ClosedReason> for SessionClosedReason {
    fn from(reason: ClosedReason) -> Self {
        match reason {
            ClosedReason::LocalRequest => SessionClosedReason::LocalRequest,
            ClosedReason::Unsupported | ClosedReason::FailedToStart => SessionClosedReason::Unsupported,
            ClosedReason::NoPeersFound | ClosedReason::LostConnection => SessionClosedReason::NoPeersFound,
            ClosedReason::SystemPolicy | ClosedReason::BackgroundPolicy => SessionClosedReason::SystemPolicy,
            ClosedReason::Unknown
            | ClosedReason::RemoteRequest
            | ClosedReason::PeerCapabilitiesMismatch
            | ClosedReason::InternalError => SessionClosedReason::Unknown,
        }
    }
}
