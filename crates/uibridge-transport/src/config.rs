//! Transport configuration and file/environment loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uibridge_protocol::{DEFAULT_HOST, DEFAULT_PORT, MAX_MESSAGE_SIZE};

use crate::backoff::Backoff;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "UIBRIDGE";

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),
}

/// Load a configuration section from a file, with `UIBRIDGE_*` environment
/// variables layered on top.
///
/// The format follows the file extension (`.toml`, `.yaml`/`.yml`, `.json`).
/// Nested keys use `__` in variable names, e.g. `UIBRIDGE_RETRY__MAX_ATTEMPTS`.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    load_config_with_prefix(path, ENV_PREFIX)
}

/// Like [`load_config`] with a custom environment prefix.
pub fn load_config_with_prefix<T: DeserializeOwned>(
    path: impl AsRef<Path>,
    env_prefix: &str,
) -> Result<T, ConfigError> {
    use config::{Config, Environment, File, FileFormat};

    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let format = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => FileFormat::Toml,
        Some("yaml" | "yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        _ => return Err(ConfigError::UnsupportedFormat),
    };

    let config = Config::builder()
        .add_source(File::new(
            path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
            format,
        ))
        .add_source(
            Environment::with_prefix(env_prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

/// Connect retry policy: `min(base * 2^attempt, max)` between attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total connect attempts, including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Delay after the first failure, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 - 1.0). Zero keeps delays deterministic.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes a single attempt.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }

    /// Set the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base and cap delays.
    #[must_use]
    pub const fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay_ms = base.as_millis() as u64;
        self.max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Base delay.
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay cap.
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// A fresh retry state machine for this policy.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self)
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Peer host. The channel is meant for loopback use.
    pub host: String,
    /// Peer port.
    pub port: u16,
    /// Per-attempt connect timeout, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Largest accepted frame, in bytes.
    pub max_frame_size: usize,
    /// Retry policy for establishing the connection.
    pub retry: RetryPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 5_000,
            max_frame_size: MAX_MESSAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl TransportConfig {
    /// Create a builder starting from the defaults.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }

    /// Load from a file with environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_config(path)
    }

    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-attempt connect timeout.
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Builder for [`TransportConfig`].
#[derive(Debug, Clone, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Set the host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the per-attempt connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the frame limit.
    #[must_use]
    pub const fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set only the attempt budget of the retry policy.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    /// Finish building.
    pub fn build(self) -> TransportConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.addr(), "127.0.0.1:9999");
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_builder() {
        let config = TransportConfig::builder()
            .host("localhost")
            .port(4000)
            .max_attempts(2)
            .connect_timeout(Duration::from_millis(250))
            .build();
        assert_eq!(config.addr(), "localhost:4000");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.connect_timeout_ms, 250);
    }

    #[test]
    fn test_from_toml_file_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "port = 7777\n\n[retry]\nmax_attempts = 9").unwrap();

        let config = TransportConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 7777);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.retry.max_attempts, 9);
        assert_eq!(config.retry.max_delay_ms, 5_000);
    }

    #[test]
    fn test_missing_file_and_bad_extension() {
        assert!(matches!(
            TransportConfig::from_file("/nonexistent/uibridge.toml"),
            Err(ConfigError::FileNotFound(_))
        ));

        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            TransportConfig::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat)
        ));
    }
}
