//! Peer error types.

use thiserror::Error;
use uibridge_protocol::{ErrorCode, ErrorPayload, ProtocolError};

/// A specialized `Result` type for peer operations.
pub type PeerResult<T> = std::result::Result<T, PeerError>;

/// Failure reported by a message handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandlerError {
    /// The handler could not complete.
    #[error("Handler failed: {0}")]
    Failed(String),

    /// The message payload was not what the handler expected.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The handler was asked about something that does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// The wire error code for this failure.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Failed(_) | Self::Panicked(_) => ErrorCode::HandlerError,
            Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
            Self::NotFound(_) => ErrorCode::NotFound,
        }
    }

    /// Convert into a `{code, message}` payload.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.code(), self.to_string())
    }
}

impl From<ProtocolError> for HandlerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidPayload { .. } => Self::InvalidPayload(err.to_string()),
            other => Self::Failed(other.to_string()),
        }
    }
}

impl From<PeerError> for HandlerError {
    fn from(err: PeerError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Errors raised by the bridge facade and the command server.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PeerError {
    /// The listener could not bind.
    #[error("Failed to bind {addr}: {reason}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        reason: String,
    },

    /// A message could not be handed to the transport.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The outgoing message could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection or host side is gone.
    #[error("Transport closed")]
    Closed,

    /// Socket I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
