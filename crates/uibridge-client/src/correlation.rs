//! Matching replies to outstanding commands.

use std::collections::HashMap;
use std::future::poll_fn;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, warn};
use uibridge_protocol::Message;

use crate::error::{BridgeError, BridgeResult};

/// A written command awaiting its reply.
#[derive(Debug)]
struct PendingCommand {
    action: String,
    responder: oneshot::Sender<BridgeResult<Message>>,
    timeout: Duration,
    timeout_key: delay_queue::Key,
    sent_at: Instant,
}

/// Outcome of feeding a reply to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// A pending command was settled; carries its round-trip time.
    Resolved(Duration),
    /// No pending command has this ID.
    Unmatched,
}

/// Pending commands keyed by message ID, each with its own timeout.
#[derive(Debug, Default)]
pub(crate) struct CorrelationTable {
    pending: HashMap<String, PendingCommand>,
    timeouts: DelayQueue<String>,
}

impl CorrelationTable {
    /// Track `id` until a reply arrives or `timeout` elapses from now.
    pub(crate) fn insert(
        &mut self,
        id: String,
        action: String,
        responder: oneshot::Sender<BridgeResult<Message>>,
        timeout: Duration,
    ) {
        let timeout_key = self.timeouts.insert(id.clone(), timeout);
        let previous = self.pending.insert(
            id.clone(),
            PendingCommand {
                action,
                responder,
                timeout,
                timeout_key,
                sent_at: Instant::now(),
            },
        );
        if let Some(previous) = previous {
            warn!("Duplicate pending command ID {}", id);
            self.timeouts.try_remove(&previous.timeout_key);
        }
    }

    /// Settle the pending command a reply answers.
    ///
    /// Error replies reject the caller with the peer's `{code, message}`.
    pub(crate) fn resolve(&mut self, reply: Message) -> Resolution {
        let Some(pending) = self.pending.remove(reply.reply_key()) else {
            return Resolution::Unmatched;
        };
        self.timeouts.try_remove(&pending.timeout_key);

        let elapsed = pending.sent_at.elapsed();
        let outcome = match reply.error_payload() {
            Some(error) => Err(BridgeError::from(error)),
            None => Ok(reply),
        };
        if pending.responder.send(outcome).is_err() {
            debug!("Caller of '{}' stopped waiting", pending.action);
        }
        Resolution::Resolved(elapsed)
    }

    /// Wait for the next timeout to fire. Pending forever while the table is empty.
    pub(crate) async fn next_expired(&mut self) -> String {
        loop {
            if let Some(expired) = poll_fn(|cx| self.timeouts.poll_expired(cx)).await {
                return expired.into_inner();
            }
            std::future::pending::<()>().await;
        }
    }

    /// Reject the command whose timeout fired. Returns `false` if it was already settled.
    pub(crate) fn expire(&mut self, id: &str) -> bool {
        let Some(pending) = self.pending.remove(id) else {
            return false;
        };
        warn!(
            "Command '{}' ({}) timed out after {:?}",
            pending.action, id, pending.timeout
        );
        let _ = pending.responder.send(Err(BridgeError::Timeout {
            action: pending.action,
            timeout: pending.timeout,
        }));
        true
    }

    /// Reject every pending command with `err` and clear the table.
    pub(crate) fn reject_all(&mut self, err: &BridgeError) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.responder.send(Err(err.clone()));
        }
        self.timeouts.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uibridge_protocol::{ErrorCode, MessageType};

    fn track(
        table: &mut CorrelationTable,
        id: &str,
        timeout_ms: u64,
    ) -> oneshot::Receiver<BridgeResult<Message>> {
        let (tx, rx) = oneshot::channel();
        table.insert(
            id.to_string(),
            "get_state".to_string(),
            tx,
            Duration::from_millis(timeout_ms),
        );
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_by_correlation_id() {
        let mut table = CorrelationTable::default();
        let rx = track(&mut table, "req-1", 1_000);

        let reply = Message::create("resp-1", MessageType::Response, "get_state", json!({"success": true}))
            .with_correlation_id("req-1");
        assert!(matches!(table.resolve(reply), Resolution::Resolved(_)));
        assert!(table.is_empty());
        assert_eq!(rx.await.unwrap().unwrap().id, "resp-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_reply_leaves_others_alone() {
        let mut table = CorrelationTable::default();
        let mut rx = track(&mut table, "req-1", 1_000);

        let stray = Message::create("x", MessageType::Response, "ping", json!({}))
            .with_correlation_id("nobody");
        assert_eq!(table.resolve(stray), Resolution::Unmatched);
        assert_eq!(table.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_reply_rejects_with_remote_error() {
        let mut table = CorrelationTable::default();
        let rx = track(&mut table, "req-9", 1_000);

        table.resolve(Message::error_response(
            Some("req-9".into()),
            ErrorCode::NotFound,
            "no such component",
        ));
        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_remote(ErrorCode::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_at_window() {
        let mut table = CorrelationTable::default();
        let start = Instant::now();
        let rx = track(&mut table, "slow", 15_000);
        let _other = track(&mut table, "slower", 30_000);

        let id = table.next_expired().await;
        assert_eq!(id, "slow");
        assert!(start.elapsed() >= Duration::from_millis(15_000));
        assert!(table.expire(&id));
        assert_eq!(table.len(), 1);

        match rx.await.unwrap() {
            Err(BridgeError::Timeout { action, timeout }) => {
                assert_eq!(action, "get_state");
                assert_eq!(timeout, Duration::from_millis(15_000));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_all_clears_timers() {
        let mut table = CorrelationTable::default();
        let rx = track(&mut table, "a", 100);
        table.reject_all(&BridgeError::ConnectionClosed);

        assert!(table.is_empty());
        assert!(matches!(rx.await.unwrap(), Err(BridgeError::ConnectionClosed)));

        let next = tokio::time::timeout(Duration::from_secs(1), table.next_expired()).await;
        assert!(next.is_err());
    }
}
