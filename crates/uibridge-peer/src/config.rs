//! Peer server configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uibridge_protocol::{DEFAULT_HOST, DEFAULT_PORT, MAX_MESSAGE_SIZE};
use uibridge_transport::{ConfigError, load_config};

/// Configuration for [`PeerServer`](crate::PeerServer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Address to listen on. Keep this on loopback: the channel is unauthenticated.
    pub host: String,
    /// Port to listen on; 0 picks a free port.
    pub port: u16,
    /// Largest accepted frame, in bytes.
    pub max_frame_size: usize,
    /// Host function name used by the callback reverse path.
    pub callback_function: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_frame_size: MAX_MESSAGE_SIZE,
            callback_function: "uibridge_receive".to_string(),
        }
    }
}

impl PeerConfig {
    /// Load from a file with `UIBRIDGE_*` environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_config(path)
    }

    /// Listen on `host:port`.
    #[must_use]
    pub fn with_addr(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PeerConfig::default();
        assert_eq!(config.addr(), "127.0.0.1:9999");
        assert_eq!(config.callback_function, "uibridge_receive");
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "port: 0\ncallback_function: bridge_in").unwrap();
        let config = PeerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 0);
        assert_eq!(config.callback_function, "bridge_in");
        assert_eq!(config.host, "127.0.0.1");
    }
}
