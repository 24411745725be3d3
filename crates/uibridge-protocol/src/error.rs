//! Protocol error types and the wire error vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A specialized `Result` type for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Machine-readable error codes carried in `{code, message}` error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    /// The inbound message could not be deserialized.
    ParseError,
    /// The message parsed but its payload did not match the action's shape.
    InvalidPayload,
    /// No handler is registered for the action.
    UnknownCommand,
    /// A handler failed while processing the message.
    HandlerError,
    /// The referenced entity does not exist.
    NotFound,
    /// No response arrived within the timeout window.
    Timeout,
    /// The connection closed before a response arrived.
    ConnectionClosed,
    /// Anything else.
    InternalError,
}

impl ErrorCode {
    /// The wire spelling of this code.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "parse_error",
            Self::InvalidPayload => "invalid_payload",
            Self::UnknownCommand => "unknown_command",
            Self::HandlerError => "handler_error",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::ConnectionClosed => "connection_closed",
            Self::InternalError => "internal_error",
        }
    }

    /// Parse a wire spelling. Unknown codes yield `None`.
    pub fn from_wire(code: &str) -> Option<Self> {
        Some(match code {
            "parse_error" => Self::ParseError,
            "invalid_payload" => Self::InvalidPayload,
            "unknown_command" => Self::UnknownCommand,
            "handler_error" => Self::HandlerError,
            "not_found" => Self::NotFound,
            "timeout" => Self::Timeout,
            "connection_closed" => Self::ConnectionClosed,
            "internal_error" => Self::InternalError,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `{code, message}` body of an error reply.
///
/// `code` is kept as a string so codes introduced by a newer peer still round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code, normally one of [`ErrorCode`].
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorPayload {
    /// Create an error payload from a known code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            message: message.into(),
        }
    }

    /// The known code carried by this payload, or `InternalError`.
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_wire(&self.code).unwrap_or(ErrorCode::InternalError)
    }

    /// Returns `true` if this payload carries `code`.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Failures while recovering message boundaries from the byte stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FramingError {
    /// Bytes that cannot start a JSON object were found between messages.
    #[error("unexpected byte 0x{byte:02x} outside a message, discarded {discarded} bytes")]
    UnexpectedByte {
        /// The first offending byte.
        byte: u8,
        /// How many bytes were dropped to resynchronise.
        discarded: usize,
    },

    /// The buffered message exceeded the frame limit.
    #[error("frame of {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Size of the buffered data.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A complete frame was not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    /// The underlying stream failed.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FramingError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors raised while encoding, decoding or interpreting messages.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Framing failure.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// A framed message failed to deserialize.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The payload did not match the shape expected for its action.
    #[error("Invalid payload for '{action}': {reason}")]
    InvalidPayload {
        /// The action whose payload was malformed.
        action: String,
        /// Deserializer message.
        reason: String,
    },

    /// The action is not part of the command vocabulary.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// Serialization of an outgoing value failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl ProtocolError {
    /// The wire error code corresponding to this error.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Framing(_) | Self::Parse(_) => ErrorCode::ParseError,
            Self::InvalidPayload { .. } => ErrorCode::InvalidPayload,
            Self::UnknownCommand(_) => ErrorCode::UnknownCommand,
            Self::Serialization(_) => ErrorCode::InternalError,
        }
    }

    /// Convert into a `{code, message}` payload.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.code(), self.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_spelling() {
        assert_eq!(ErrorCode::ParseError.to_string(), "parse_error");
        assert_eq!(
            serde_json::to_string(&ErrorCode::ConnectionClosed).unwrap(),
            "\"connection_closed\""
        );
        let code: ErrorCode = serde_json::from_str("\"unknown_command\"").unwrap();
        assert_eq!(code, ErrorCode::UnknownCommand);
        assert_eq!(ErrorCode::from_wire("not_found"), Some(ErrorCode::NotFound));
        assert_eq!(ErrorCode::from_wire("teapot"), None);
    }

    #[test]
    fn test_protocol_error_codes() {
        let err = ProtocolError::UnknownCommand("explode".into());
        assert_eq!(err.code(), ErrorCode::UnknownCommand);

        let payload = ProtocolError::Parse("eof".into()).to_payload();
        assert!(payload.is(ErrorCode::ParseError));
        assert!(payload.message.contains("eof"));
    }
}
