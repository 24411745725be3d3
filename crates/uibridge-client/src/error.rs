//! Errors surfaced to callers of the host client.

use std::time::Duration;

use thiserror::Error;
use uibridge_protocol::{ErrorCode, ErrorPayload, ProtocolError};
use uibridge_transport::TransportError;

/// A specialized `Result` type for client operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Errors a command can fail with.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum BridgeError {
    /// The connection could not be established.
    #[error("Connection error: {0}")]
    Connection(#[from] TransportError),

    /// No reply arrived within the timeout window.
    #[error("Command '{action}' timed out after {timeout:?}")]
    Timeout {
        /// Action of the command that timed out.
        action: String,
        /// The window that elapsed.
        timeout: Duration,
    },

    /// The connection closed before a reply arrived.
    #[error("Connection closed before a reply arrived")]
    ConnectionClosed,

    /// The peer answered with an error envelope.
    #[error("Peer error [{code}]: {message}")]
    Remote {
        /// Wire error code.
        code: String,
        /// Peer's description.
        message: String,
    },

    /// The message could not be encoded or the reply decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The client's connection task is gone.
    #[error("Client has shut down")]
    ClientClosed,
}

impl BridgeError {
    /// The wire error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Connection(_) | Self::ConnectionClosed | Self::ClientClosed => {
                ErrorCode::ConnectionClosed
            }
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Remote { code, .. } => {
                ErrorCode::from_wire(code).unwrap_or(ErrorCode::InternalError)
            }
            Self::Protocol(e) => e.code(),
        }
    }

    /// Whether the peer rejected the command with `code`.
    pub fn is_remote(&self, code: ErrorCode) -> bool {
        matches!(self, Self::Remote { code: c, .. } if c == code.as_str())
    }

    /// Convert into a `{code, message}` payload.
    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            Self::Remote { code, message } => ErrorPayload {
                code: code.clone(),
                message: message.clone(),
            },
            other => ErrorPayload::new(other.code(), other.to_string()),
        }
    }
}

impl From<ErrorPayload> for BridgeError {
    fn from(payload: ErrorPayload) -> Self {
        Self::Remote {
            code: payload.code,
            message: payload.message,
        }
    }
}
