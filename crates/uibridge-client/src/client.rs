//! The public host-side handle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use uibridge_protocol::{Command, Message, Reply};
use uibridge_transport::{AtomicMetrics, ConnectionState, TransportMetrics};

use crate::config::ClientConfig;
use crate::connection::{ConnectionTask, Request, Target};
use crate::error::{BridgeError, BridgeResult};
use crate::queue::{Completion, QueuedCommand};

/// Handle to a bridge connection.
///
/// Cloning is cheap; all clones drive the same connection task. The task stops
/// once every clone is dropped, failing any outstanding command with
/// [`BridgeError::ClientClosed`].
///
/// ```rust,no_run
/// use uibridge_client::{BridgeClient, ClientConfig};
///
/// # async fn demo() -> Result<(), uibridge_client::BridgeError> {
/// let client = BridgeClient::new(ClientConfig::default());
/// // The first command connects on demand.
/// assert_eq!(client.ping().await?, "pong");
/// let sum = client.add(2.0, 3.0).await?;
/// assert_eq!(sum, 5.0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BridgeClient {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<Message>,
    metrics: Arc<AtomicMetrics>,
    config: Arc<ClientConfig>,
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("addr", &self.config.transport.addr())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl BridgeClient {
    /// Create a client and spawn its connection task.
    ///
    /// Nothing connects until [`connect`](Self::connect) or the first command.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(config: ClientConfig) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(config.command_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let metrics = Arc::new(AtomicMetrics::new());

        let task = ConnectionTask::new(
            config.clone(),
            Arc::clone(&metrics),
            requests_rx,
            state_tx,
            events_tx.clone(),
        );
        tokio::spawn(task.run());

        Self {
            requests: requests_tx,
            state: state_rx,
            events: events_tx,
            metrics,
            config: Arc::new(config),
        }
    }

    /// The client's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Receive messages the peer sends that are not replies.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.events.subscribe()
    }

    /// Snapshot of the connection counters.
    pub fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    async fn dispatch(&self, request: Request) -> BridgeResult<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| BridgeError::ClientClosed)
    }

    /// Connect to the configured peer.
    ///
    /// Resolves immediately when already connected. Concurrent callers share
    /// the attempt in flight.
    pub async fn connect(&self) -> BridgeResult<()> {
        let (responder, rx) = oneshot::channel();
        self.dispatch(Request::Connect {
            target: None,
            responder,
        })
        .await?;
        rx.await.map_err(|_| BridgeError::ClientClosed)?
    }

    /// Connect to `host:port`, making at most `max_attempts` attempts in
    /// total (the first try included).
    ///
    /// The target only applies when no connection or attempt exists yet.
    pub async fn connect_to(
        &self,
        host: impl Into<String>,
        port: u16,
        max_attempts: u32,
    ) -> BridgeResult<()> {
        let (responder, rx) = oneshot::channel();
        self.dispatch(Request::Connect {
            target: Some(Target {
                host: host.into(),
                port,
                max_attempts,
            }),
            responder,
        })
        .await?;
        rx.await.map_err(|_| BridgeError::ClientClosed)?
    }

    /// Close the socket and fail every queued and pending command.
    pub async fn disconnect(&self) {
        let (responder, rx) = oneshot::channel();
        if self.dispatch(Request::Disconnect { responder }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Send a message and wait for its correlated reply, using the configured timeout.
    ///
    /// The message is queued and a connect started when the client is offline.
    /// Error replies come back as [`BridgeError::Remote`].
    pub async fn request(&self, message: Message) -> BridgeResult<Message> {
        self.request_with_timeout(message, self.config.request_timeout())
            .await
    }

    /// [`request`](Self::request) with an explicit reply window.
    pub async fn request_with_timeout(
        &self,
        message: Message,
        timeout: Duration,
    ) -> BridgeResult<Message> {
        let (responder, rx) = oneshot::channel();
        self.dispatch(Request::Send(QueuedCommand {
            message,
            completion: Completion::Reply { responder, timeout },
        }))
        .await?;
        rx.await.map_err(|_| BridgeError::ClientClosed)?
    }

    /// Send a message without waiting for a reply. Resolves once the message
    /// is queued on the open connection.
    pub async fn notify(&self, message: Message) -> BridgeResult<()> {
        let (responder, rx) = oneshot::channel();
        self.dispatch(Request::Send(QueuedCommand {
            message,
            completion: Completion::Written(responder),
        }))
        .await?;
        rx.await.map_err(|_| BridgeError::ClientClosed)?
    }

    /// Send a typed command and decode the reply envelope.
    pub async fn send(&self, command: Command) -> BridgeResult<Reply> {
        let reply = self.request(command.into_message()?).await?;
        let envelope = Reply::from_value(reply.payload)?;
        match envelope.error {
            Some(error) if !envelope.success => Err(error.into()),
            _ => Ok(envelope),
        }
    }

    /// `ping`; returns the peer's `pong`.
    pub async fn ping(&self) -> BridgeResult<String> {
        let reply = self.send(Command::ping()).await?;
        Ok(reply
            .result
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// `load_component`; returns the new component's ID.
    pub async fn load_component(&self, config: Value) -> BridgeResult<String> {
        let reply = self.send(Command::LoadComponent { config }).await?;
        Ok(reply.id.unwrap_or_default())
    }

    /// `call_method`; returns the method's result.
    pub async fn call_method(
        &self,
        id: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> BridgeResult<Value> {
        let reply = self
            .send(Command::CallMethod {
                id: id.into(),
                method: method.into(),
                args,
            })
            .await?;
        Ok(reply.result.unwrap_or(Value::Null))
    }

    /// `get_state`; returns the component's state.
    pub async fn get_state(&self, id: impl Into<String>) -> BridgeResult<Value> {
        let reply = self.send(Command::GetState { id: id.into() }).await?;
        Ok(reply.state.unwrap_or(Value::Null))
    }

    /// `get_events`; drains the peer's event log.
    pub async fn get_events(&self) -> BridgeResult<Vec<Value>> {
        let reply = self.send(Command::get_events()).await?;
        Ok(reply.events.unwrap_or_default())
    }

    /// `echo`; returns `data` as the peer saw it.
    pub async fn echo(&self, data: Value) -> BridgeResult<Value> {
        let reply = self.send(Command::Echo { data }).await?;
        Ok(reply.data.unwrap_or(Value::Null))
    }

    /// `add`; returns `a + b` computed by the peer.
    pub async fn add(&self, a: f64, b: f64) -> BridgeResult<f64> {
        let reply = self.send(Command::Add { a, b }).await?;
        reply
            .result
            .as_ref()
            .and_then(Value::as_f64)
            .ok_or_else(|| BridgeError::Remote {
                code: "invalid_payload".into(),
                message: format!("add returned {}", json!(reply.result)),
            })
    }

    /// Ask the peer to shut down, then disconnect without reconnecting.
    pub async fn shutdown_peer(&self) -> BridgeResult<()> {
        let outcome = self.send(Command::shutdown()).await.map(|_| ());
        self.disconnect().await;
        outcome
    }

    /// Return the client to a freshly constructed state: disconnected, nothing
    /// queued or pending, counters zeroed.
    #[cfg(any(test, feature = "test-utils"))]
    pub async fn reset_for_tests(&self) {
        tracing::debug!("Resetting client for tests");
        self.disconnect().await;
        self.metrics.reset();
    }
}
