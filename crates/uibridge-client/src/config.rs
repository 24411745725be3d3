//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uibridge_transport::{ConfigError, RetryPolicy, TransportConfig, load_config};

/// Configuration for [`BridgeClient`](crate::BridgeClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Peer address, frame limit and connect retry policy.
    pub transport: TransportConfig,
    /// How long a written command waits for its reply, in milliseconds.
    pub request_timeout_ms: u64,
    /// Re-establish the socket when it closes unexpectedly.
    pub auto_reconnect: bool,
    /// Silent reconnect attempts before pending commands are rejected.
    pub max_reconnect_attempts: u32,
    /// Buffered unsolicited messages per subscriber.
    pub event_capacity: usize,
    /// Capacity of the channel into the connection task.
    pub command_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            request_timeout_ms: 15_000,
            auto_reconnect: true,
            max_reconnect_attempts: 3,
            event_capacity: 256,
            command_buffer: 256,
        }
    }
}

impl ClientConfig {
    /// Create a builder starting from the defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Load from a file with `UIBRIDGE_*` environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_config(path)
    }

    /// Reply timeout window.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Retry policy for silent reconnects; shares delays with the connect policy.
    pub fn reconnect_policy(&self) -> RetryPolicy {
        self.transport
            .retry
            .clone()
            .with_max_attempts(self.max_reconnect_attempts)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the peer host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.transport.host = host.into();
        self
    }

    /// Set the peer port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.config.transport.port = port;
        self
    }

    /// Replace the transport configuration.
    #[must_use]
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.config.transport = transport;
        self
    }

    /// Set the connect retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.transport.retry = retry;
        self
    }

    /// Set the reply timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable or disable silent reconnects.
    #[must_use]
    pub const fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Set the silent reconnect budget.
    #[must_use]
    pub const fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Set the per-subscriber event buffer.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Finish building.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_policy().max_attempts, 3);
        assert_eq!(config.transport.addr(), "127.0.0.1:9999");
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder()
            .port(12345)
            .request_timeout(Duration::from_millis(500))
            .auto_reconnect(false)
            .build();
        assert_eq!(config.transport.port, 12345);
        assert_eq!(config.request_timeout_ms, 500);
        assert!(!config.auto_reconnect);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"request_timeout_ms": 2500, "transport": {{"port": 4100}}}}"#
        )
        .unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.request_timeout_ms, 2500);
        assert_eq!(config.transport.port, 4100);
        assert_eq!(config.max_reconnect_attempts, 3);
    }
}
