// Error surface for all FBM client operations.

use crate::buffer::BufferFull;
use crate::codec::ParseStatus;
use std::io;
use thiserror::Error;

/// Failures surfaced by send/stream operations and response access.
///
/// Inbound-side problems (oversized or malformed messages, unknown ids) are
/// recovered locally by dropping the offending message; they never appear
/// here. Receive-loop fatal errors reach the application only through the
/// close events.
#[derive(Debug, Error)]
pub enum FbmError {
    /// Message id is zero or the request is shorter than the id record
    #[error("invalid request: missing or zero message id")]
    InvalidRequest,

    /// The id is already registered in the pending table
    #[error("message id {0} is already in flight")]
    DuplicateMessageId(i32),

    /// A write would exceed the request buffer's fixed capacity
    #[error(transparent)]
    BufferFull(#[from] BufferFull),

    /// Operation invoked before connect or after the connection closed
    #[error("client is not connected")]
    NotConnected,

    /// Operation invoked after dispose
    #[error("client has been disposed")]
    Disposed,

    /// The per-request deadline expired before a response arrived
    #[error("response deadline elapsed")]
    ResponseTimedOut,

    /// Cooperative cancellation of a send or wait
    #[error("operation cancelled")]
    Cancelled,

    /// Failure reported by the underlying transport
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failure reading the caller's body stream
    #[error("body stream failure: {0}")]
    Io(#[from] io::Error),

    /// A response was requested but none has been delivered
    #[error("no response has been delivered for this request")]
    UnsetResponse,

    /// Response header parsing reported failure flags
    #[error("response header parse failed: {0:?}")]
    HeaderParse(ParseStatus),
}

impl FbmError {
    /// Wraps a transport implementation error.
    pub fn transport<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FbmError::Transport(Box::new(source))
    }
}

/// Result alias for FBM client operations.
pub type FbmResult<T> = Result<T, FbmError>;
