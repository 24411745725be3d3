//! Connection metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A serializable snapshot of a connection's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportMetrics {
    /// Serialized bytes written to the socket.
    pub bytes_sent: u64,

    /// Framed bytes read from the socket.
    pub bytes_received: u64,

    /// Messages written.
    pub messages_sent: u64,

    /// Complete frames read.
    pub messages_received: u64,

    /// TCP connect attempts, including retries.
    pub connection_attempts: u64,

    /// Connect attempts that failed or timed out.
    pub failed_connections: u64,

    /// Number of times an unexpectedly closed connection was re-established.
    pub reconnects: u64,

    /// Number of commands that timed out waiting for a reply.
    pub timeouts: u64,

    /// Replies that matched no pending command.
    pub unmatched_replies: u64,

    /// Average command round trip, in milliseconds.
    pub average_latency_ms: f64,
}

/// Lock-free counters shared between the connection task and its handles.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    /// See [`TransportMetrics::bytes_sent`].
    pub bytes_sent: AtomicU64,

    /// See [`TransportMetrics::bytes_received`].
    pub bytes_received: AtomicU64,

    /// See [`TransportMetrics::messages_sent`].
    pub messages_sent: AtomicU64,

    /// See [`TransportMetrics::messages_received`].
    pub messages_received: AtomicU64,

    /// See [`TransportMetrics::connection_attempts`].
    pub connection_attempts: AtomicU64,

    /// See [`TransportMetrics::failed_connections`].
    pub failed_connections: AtomicU64,

    /// See [`TransportMetrics::reconnects`].
    pub reconnects: AtomicU64,

    /// See [`TransportMetrics::timeouts`].
    pub timeouts: AtomicU64,

    /// See [`TransportMetrics::unmatched_replies`].
    pub unmatched_replies: AtomicU64,

    /// Round-trip latency as an exponential moving average, in microseconds.
    avg_latency_us: AtomicU64,
}

impl AtomicMetrics {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one outgoing message of `bytes` bytes.
    pub fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Count one incoming message of `bytes` bytes.
    pub fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Increment a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold one request round trip into the moving average (weight 1/10).
    pub fn update_latency_us(&self, latency_us: u64) {
        let current = self.avg_latency_us.load(Ordering::Relaxed);
        let averaged = if current == 0 {
            latency_us
        } else {
            // alpha = 0.1, saturating so multi-second latencies cannot overflow
            current.saturating_mul(9).saturating_add(latency_us) / 10
        };
        self.avg_latency_us.store(averaged, Ordering::Relaxed);
    }

    /// Creates a serializable snapshot from the current atomic values.
    pub fn snapshot(&self) -> TransportMetrics {
        TransportMetrics {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            unmatched_replies: self.unmatched_replies.load(Ordering::Relaxed),
            average_latency_ms: (self.avg_latency_us.load(Ordering::Relaxed) as f64) / 1000.0,
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.bytes_sent,
            &self.bytes_received,
            &self.messages_sent,
            &self.messages_received,
            &self.connection_attempts,
            &self.failed_connections,
            &self.reconnects,
            &self.timeouts,
            &self.unmatched_replies,
            &self.avg_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
