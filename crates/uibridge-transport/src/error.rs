//! Transport error types.

use std::time::Duration;

use thiserror::Error;
use uibridge_protocol::FramingError;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors raised while establishing or driving a connection.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// The socket was refused or reset while connecting.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A single connect attempt did not complete in time.
    #[error("Connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Target address.
        addr: String,
        /// Per-attempt connect timeout.
        timeout: Duration,
    },

    /// Every attempt allowed by the retry policy failed.
    #[error("Failed to connect after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },

    /// The connection closed underneath an operation.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Host or port cannot be used to connect.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The byte stream could not be framed.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Any other I/O failure.
    #[error("IO error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether another connect attempt may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::ConnectTimeout { .. } | Self::Io(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrNotAvailable => Self::ConnectionFailed(err.to_string()),
            ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => Self::ConnectionClosed,
            _ => Self::Io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(matches!(
            TransportError::from(refused),
            TransportError::ConnectionFailed(_)
        ));

        let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert!(matches!(
            TransportError::from(eof),
            TransportError::ConnectionClosed
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(TransportError::ConnectionFailed("refused".into()).is_retryable());
        assert!(!TransportError::InvalidAddress("port 0".into()).is_retryable());
        assert!(!TransportError::ConnectionClosed.is_retryable());
    }

    #[test]
    fn test_exhausted_names_attempt_count() {
        let err = TransportError::RetriesExhausted {
            attempts: 5,
            last_error: "Connection failed: refused".into(),
        };
        assert!(err.to_string().contains("after 5 attempts"));
    }
}
