//! Error hierarchy for cluster membership and connection admission.
//!
//! Errors are grouped by the layer that produces them. Connection attempts
//! report a [`ConnectError`] whose variant tells the caller whether the next
//! candidate endpoint is worth trying; established sessions report
//! [`NetworkError`]; the membership writer reports [`MembershipError`].

use std::net::SocketAddr;
use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

use crate::Endpoint;
use crate::MemberStatus;
use crate::NodeId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (sockets, codec, background tasks)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Outbound connection attempt failures
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Membership view transitions and writer failures
    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Outcome of a failed connection attempt against a single endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Deadline elapsed before the handshake completed
    #[error("Connection to {endpoint} timed out after {after:?}")]
    Timeout { endpoint: Endpoint, after: Duration },

    /// Peer actively rejected the connection or the handshake
    #[error("Connection to {endpoint} refused: {reason}")]
    Refused { endpoint: Endpoint, reason: String },

    /// Transport-level failure other than refusal
    #[error("Network failure connecting to {endpoint}: {source}")]
    NetworkFailure {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    /// Handshake data malformed or unexpected
    #[error("Protocol violation from {endpoint}: {detail}")]
    ProtocolViolation { endpoint: Endpoint, detail: String },
}

impl ConnectError {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            ConnectError::Timeout { endpoint, .. }
            | ConnectError::Refused { endpoint, .. }
            | ConnectError::NetworkFailure { endpoint, .. }
            | ConnectError::ProtocolViolation { endpoint, .. } => *endpoint,
        }
    }

    /// Whether the next candidate endpoint should be tried.
    ///
    /// A protocol violation means we are talking to something that is not a
    /// cluster member, so it is surfaced instead of retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectError::ProtocolViolation { .. })
    }

    pub(crate) fn outcome_label(&self) -> &'static str {
        match self {
            ConnectError::Timeout { .. } => "timeout",
            ConnectError::Refused { .. } => "refused",
            ConnectError::NetworkFailure { .. } => "network_failure",
            ConnectError::ProtocolViolation { .. } => "protocol_violation",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Peer did not answer a request on an established session
    #[error("No response from {peer} within {timeout:?}")]
    ResponseTimeout { peer: Endpoint, timeout: Duration },

    #[error("Connection to {0} closed by peer")]
    ConnectionClosed(Endpoint),

    /// Peer answered with a message that does not fit the exchange
    #[error("Unexpected {received} from {peer}, expected {expected}")]
    UnexpectedMessage {
        peer: Endpoint,
        expected: &'static str,
        received: &'static str,
    },

    /// Peer answered a request with an explicit rejection
    #[error("Request rejected by {peer}: {reason}")]
    Rejected { peer: Endpoint, reason: String },

    #[error("Frame codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Registry held no endpoint to try
    #[error("No candidate endpoint available")]
    NoCandidates,

    #[error("Invalid endpoint address: {0}")]
    InvalidEndpoint(String),

    /// Host name lookup failed or timed out
    #[error("Failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Node failed to start: {0}")]
    NodeStartFailed(String),

    #[error("{0}")]
    SignalSendFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("No member found for node {node_id}")]
    NoMemberFound { node_id: NodeId },

    #[error("Member {node_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        node_id: NodeId,
        from: MemberStatus,
        to: MemberStatus,
    },

    /// A departed member tried to come back under the same identity
    #[error("Member {node_id} already left the cluster")]
    AlreadyLeft { node_id: NodeId },

    /// A joiner presented an older run than the one already known
    #[error("Member {node_id} incarnation {incarnation} is older than known incarnation {current}")]
    StaleIncarnation {
        node_id: NodeId,
        incarnation: u64,
        current: u64,
    },

    #[error("Join rejected by {peer}: {reason}")]
    JoinRejected { peer: Endpoint, reason: String },

    /// The single writer task is gone (node shutting down)
    #[error("Membership writer stopped")]
    WriterClosed,
}

impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::System(SystemError::Io(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        NetworkError::Codec(e).into()
    }
}

impl Error {
    /// The underlying connect error, if this error came from an attempt.
    pub fn as_connect_error(&self) -> Option<&ConnectError> {
        match self {
            Error::Connect(e) => Some(e),
            _ => None,
        }
    }
}
