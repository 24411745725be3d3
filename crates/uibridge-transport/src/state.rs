//! Connection lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a host connection is in its lifecycle.
///
/// `Disconnected → Connecting → Connected → Disconnected`, with `Reconnecting`
/// standing in for `Connecting` when the drop was not requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No socket and no attempt in flight.
    #[default]
    Disconnected,
    /// A caller-initiated connect attempt is in flight.
    Connecting,
    /// The socket is open and commands are written immediately.
    Connected,
    /// The socket closed unexpectedly and a silent reconnect is in flight.
    Reconnecting,
}

impl ConnectionState {
    /// Whether commands can be written right now.
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether a connect or reconnect attempt is in flight.
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Connecting.is_connecting());
        assert!(ConnectionState::Reconnecting.is_connecting());
        assert!(!ConnectionState::default().is_connecting());
    }
}
