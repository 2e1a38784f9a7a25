//! Error types for the bridge core.

use thiserror::Error;

/// Transport-level failures on the device socket.
///
/// These drive the connection state machine and the manager's reconnect
/// policy. They are logged and consumed locally, never sent over the wire.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connection refused by {0}")]
    Refused(String),

    #[error("connection reset by peer")]
    Reset,

    #[error("connection attempt timed out")]
    TimedOut,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("not connected")]
    NotConnected,

    #[error("invalid device address: {0}")]
    BadAddress(String),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Violations of the request/response/event contract on inbound messages.
///
/// Except for malformed framing (a `ConnectionError`), these answer the
/// specific requester and leave the connection up.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("response with unknown id {0}")]
    UnknownResponseId(u64),
}

/// Failures interpreting a remote request against the studio object model.
///
/// These become structured error responses for the remote caller and never
/// affect the host.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl DomainError {
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }
}

/// Terminal outcomes for a pending request, seen by the waiting caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,

    #[error("connection lost before a response arrived")]
    ConnectionLost,

    #[error("shutting down")]
    Shutdown,
}

/// Umbrella error for the crate's public surface.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("request error: {0}")]
    Request(#[from] RequestError),
}

/// Result type alias for the bridge core.
pub type Result<T> = std::result::Result<T, BridgeError>;
