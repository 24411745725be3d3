//! Establishing framed TCP connections with bounded retries.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use uibridge_protocol::JsonObjectCodec;

use crate::config::{RetryPolicy, TransportConfig};
use crate::error::{TransportError, TransportResult};
use crate::metrics::AtomicMetrics;

/// A TCP stream carrying concatenated JSON objects.
pub type JsonStream = Framed<TcpStream, JsonObjectCodec>;

/// Wrap an established stream in the JSON object codec.
pub fn frame_stream(stream: TcpStream, max_frame_size: usize) -> JsonStream {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY: {}", e);
    }
    Framed::new(stream, JsonObjectCodec::with_max_frame_size(max_frame_size))
}

/// Opens connections to the configured peer.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    config: TransportConfig,
    metrics: Arc<AtomicMetrics>,
}

impl TcpConnector {
    /// Create a connector that records into `metrics`.
    pub fn new(config: TransportConfig, metrics: Arc<AtomicMetrics>) -> Self {
        Self { config, metrics }
    }

    /// The connector's configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// A copy of this connector using a different retry policy.
    #[must_use]
    pub fn with_retry(&self, retry: RetryPolicy) -> Self {
        let mut config = self.config.clone();
        config.retry = retry;
        Self::new(config, Arc::clone(&self.metrics))
    }

    /// Point the connector at another peer.
    pub fn retarget(&mut self, host: impl Into<String>, port: u16, max_attempts: u32) {
        self.config.host = host.into();
        self.config.port = port;
        self.config.retry.max_attempts = max_attempts;
    }

    fn validate(&self) -> TransportResult<()> {
        if self.config.host.trim().is_empty() {
            return Err(TransportError::InvalidAddress("empty host".into()));
        }
        if self.config.port == 0 {
            return Err(TransportError::InvalidAddress("port 0".into()));
        }
        Ok(())
    }

    /// Make one connect attempt bounded by the connect timeout.
    pub async fn connect_once(&self) -> TransportResult<JsonStream> {
        self.validate()?;
        let addr = self.config.addr();
        let timeout = self.config.connect_timeout();
        AtomicMetrics::incr(&self.metrics.connection_attempts);

        let attempt = tokio::time::timeout(
            timeout,
            TcpStream::connect((self.config.host.as_str(), self.config.port)),
        )
        .await;

        match attempt {
            Ok(Ok(stream)) => {
                debug!("Connected to {}", addr);
                Ok(frame_stream(stream, self.config.max_frame_size))
            }
            Ok(Err(e)) => {
                AtomicMetrics::incr(&self.metrics.failed_connections);
                Err(TransportError::ConnectionFailed(format!("{addr}: {e}")))
            }
            Err(_) => {
                AtomicMetrics::incr(&self.metrics.failed_connections);
                Err(TransportError::ConnectTimeout { addr, timeout })
            }
        }
    }

    /// Connect, retrying with backoff until the retry policy is spent.
    ///
    /// Fails with [`TransportError::RetriesExhausted`] naming the attempt count.
    pub async fn connect(&self) -> TransportResult<JsonStream> {
        self.validate()?;
        let mut backoff = self.config.retry.backoff();

        loop {
            let err = match self.connect_once().await {
                Ok(stream) => {
                    if backoff.failures() > 0 {
                        info!(
                            "Connected to {} after {} failed attempts",
                            self.config.addr(),
                            backoff.failures()
                        );
                    }
                    return Ok(stream);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            match backoff.next_delay() {
                Some(delay) => {
                    warn!(
                        "Connect attempt {}/{} failed: {}; retrying in {:?}",
                        backoff.failures(),
                        backoff.max_attempts(),
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    return Err(TransportError::RetriesExhausted {
                        attempts: backoff.failures(),
                        last_error: err.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_invalid_address_fails_fast() {
        let config = TransportConfig::builder().port(0).build();
        let connector = TcpConnector::new(config, Arc::new(AtomicMetrics::new()));
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress(_)));
    }

    #[test]
    fn test_retarget_and_with_retry() {
        let mut connector =
            TcpConnector::new(TransportConfig::default(), Arc::new(AtomicMetrics::new()));
        connector.retarget("localhost", 4242, 2);
        assert_eq!(connector.config().addr(), "localhost:4242");
        assert_eq!(connector.config().retry.max_attempts, 2);

        let single = connector.with_retry(RetryPolicy::no_retry());
        assert_eq!(single.config().retry.max_attempts, 1);
        assert_eq!(single.config().port, 4242);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let metrics = Arc::new(AtomicMetrics::new());
        let config = TransportConfig::builder()
            .port(port)
            .retry(
                RetryPolicy::default()
                    .with_max_attempts(3)
                    .with_delays(Duration::from_millis(1), Duration::from_millis(5)),
            )
            .build();
        let err = TcpConnector::new(config, metrics.clone())
            .connect()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransportError::RetriesExhausted { attempts: 3, .. }
        ));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connection_attempts, 3);
        assert_eq!(snapshot.failed_connections, 3);
    }
}
