//! The connection task.
//!
//! One task owns the read half of the socket, the command queue and the
//! correlation table, so none of them need locks. Client handles talk to it
//! over a channel. Writes go through a per-connection writer task so a peer
//! that stops reading cannot stall timeouts, inbound frames or `disconnect`.

use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uibridge_protocol::{FramingError, Message, ProtocolError};
use uibridge_transport::{
    AtomicMetrics, ConnectionState, JsonStream, TcpConnector, TransportError, TransportResult,
};

use crate::config::ClientConfig;
use crate::correlation::{CorrelationTable, Resolution};
use crate::error::{BridgeError, BridgeResult};
use crate::queue::{CommandQueue, Completion, QueuedCommand};

type ConnectFuture = Pin<Box<dyn Future<Output = TransportResult<JsonStream>> + Send>>;
type FrameSink = SplitSink<JsonStream, String>;
type FrameSource = SplitStream<JsonStream>;

/// Peer address override for a single connect call.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) max_attempts: u32,
}

/// Messages from client handles to the connection task.
#[derive(Debug)]
pub(crate) enum Request {
    Connect {
        target: Option<Target>,
        responder: oneshot::Sender<BridgeResult<()>>,
    },
    Send(QueuedCommand),
    Disconnect {
        responder: oneshot::Sender<()>,
    },
}

/// Which kind of attempt is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptKind {
    Connect,
    Reconnect,
}

/// Outbound half of an open connection.
///
/// Dropping it aborts the writer task along with anything it has not yet
/// written.
#[derive(Debug)]
struct Writer {
    outgoing: mpsc::UnboundedSender<String>,
    task: JoinHandle<TransportResult<()>>,
}

impl Writer {
    fn spawn(sink: FrameSink, metrics: Arc<AtomicMetrics>) -> Self {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_frames(sink, outgoing_rx, metrics));
        Self { outgoing, task }
    }

    /// Queue `json` for the socket. Hands it back if the writer has stopped.
    fn submit(&self, json: String) -> Result<(), String> {
        self.outgoing.send(json).map_err(|e| e.0)
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn write_frames(
    mut sink: FrameSink,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    metrics: Arc<AtomicMetrics>,
) -> TransportResult<()> {
    while let Some(json) = outgoing.recv().await {
        let len = json.len();
        sink.send(json).await?;
        metrics.record_sent(len);
    }
    let _ = sink.close().await;
    Ok(())
}

pub(crate) struct ConnectionTask {
    config: ClientConfig,
    connector: TcpConnector,
    requests: mpsc::Receiver<Request>,
    frames: Option<FrameSource>,
    writer: Option<Writer>,
    attempt: Option<(AttemptKind, ConnectFuture)>,
    connect_waiters: Vec<oneshot::Sender<BridgeResult<()>>>,
    queue: CommandQueue,
    table: CorrelationTable,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<Message>,
    metrics: Arc<AtomicMetrics>,
}

impl std::fmt::Debug for ConnectionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTask")
            .field("addr", &self.connector.config().addr())
            .field("state", &*self.state.borrow())
            .field("queued", &self.queue.len())
            .field("pending", &self.table.len())
            .finish()
    }
}

async fn next_frame(frames: &mut Option<FrameSource>) -> Option<Result<String, FramingError>> {
    match frames {
        Some(frames) => frames.next().await,
        None => pending().await,
    }
}

/// Resolves when the writer task stops. The caller must drop the writer
/// before polling again.
async fn writer_stopped(writer: &mut Option<Writer>) -> TransportResult<()> {
    match writer {
        Some(writer) => match (&mut writer.task).await {
            Ok(result) => result,
            Err(e) => Err(TransportError::Io(format!("writer task failed: {e}"))),
        },
        None => pending().await,
    }
}

async fn attempt_outcome(
    attempt: &mut Option<(AttemptKind, ConnectFuture)>,
) -> (AttemptKind, TransportResult<JsonStream>) {
    match attempt {
        Some((kind, future)) => (*kind, future.as_mut().await),
        None => pending().await,
    }
}

impl ConnectionTask {
    pub(crate) fn new(
        config: ClientConfig,
        metrics: Arc<AtomicMetrics>,
        requests: mpsc::Receiver<Request>,
        state: watch::Sender<ConnectionState>,
        events: broadcast::Sender<Message>,
    ) -> Self {
        let connector = TcpConnector::new(config.transport.clone(), Arc::clone(&metrics));
        Self {
            config,
            connector,
            requests,
            frames: None,
            writer: None,
            attempt: None,
            connect_waiters: Vec::new(),
            queue: CommandQueue::default(),
            table: CorrelationTable::default(),
            state,
            events,
            metrics,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("Connection task started for {}", self.connector.config().addr());
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                (kind, outcome) = attempt_outcome(&mut self.attempt) => {
                    self.attempt = None;
                    self.on_attempt_finished(kind, outcome);
                }
                frame = next_frame(&mut self.frames) => self.on_frame(frame),
                outcome = writer_stopped(&mut self.writer) => {
                    let reason = match outcome {
                        Ok(()) => TransportError::ConnectionClosed,
                        Err(e) => e,
                    };
                    warn!("Writer for {} stopped: {}", self.connector.config().addr(), reason);
                    self.on_connection_lost(reason);
                }
                id = self.table.next_expired(), if !self.table.is_empty() => {
                    if self.table.expire(&id) {
                        AtomicMetrics::incr(&self.metrics.timeouts);
                    }
                }
            }
        }

        debug!("All client handles dropped, stopping connection task");
        self.teardown(&BridgeError::ClientClosed);
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            trace!("Connection state {} -> {}", current, state);
            *current = state;
            true
        });
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect { target, responder } => {
                if self.current_state().is_connected() {
                    let _ = responder.send(Ok(()));
                    return;
                }
                if let Some(target) = target
                    && self.attempt.is_none()
                {
                    self.connector
                        .retarget(target.host, target.port, target.max_attempts);
                }
                self.connect_waiters.push(responder);
                self.ensure_connecting();
            }
            Request::Send(command) => {
                if self.is_open() {
                    self.write(command);
                } else {
                    trace!("Queueing '{}' until connected", command.message.action);
                    self.queue.push(command);
                    self.ensure_connecting();
                }
            }
            Request::Disconnect { responder } => {
                info!("Disconnecting from {}", self.connector.config().addr());
                self.teardown(&BridgeError::ConnectionClosed);
                let _ = responder.send(());
            }
        }
    }

    /// Start a connect attempt unless one is already running.
    fn ensure_connecting(&mut self) {
        if self.attempt.is_some() || self.is_open() {
            return;
        }
        self.set_state(ConnectionState::Connecting);
        let connector = self.connector.clone();
        self.attempt = Some((
            AttemptKind::Connect,
            Box::pin(async move { connector.connect().await }),
        ));
    }

    fn start_reconnect(&mut self) {
        self.set_state(ConnectionState::Reconnecting);
        let connector = self.connector.with_retry(self.config.reconnect_policy());
        self.attempt = Some((
            AttemptKind::Reconnect,
            Box::pin(async move { connector.connect().await }),
        ));
    }

    fn on_attempt_finished(&mut self, kind: AttemptKind, outcome: TransportResult<JsonStream>) {
        match outcome {
            Ok(stream) => {
                info!("Connected to {}", self.connector.config().addr());
                if kind == AttemptKind::Reconnect {
                    AtomicMetrics::incr(&self.metrics.reconnects);
                }
                let (sink, frames) = stream.split();
                self.writer = Some(Writer::spawn(sink, Arc::clone(&self.metrics)));
                self.frames = Some(frames);
                self.set_state(ConnectionState::Connected);
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                self.flush();
            }
            Err(err) => {
                error!("Connection to {} failed: {}", self.connector.config().addr(), err);
                self.set_state(ConnectionState::Disconnected);
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Err(BridgeError::Connection(err.clone())));
                }
                let rejection = match kind {
                    AttemptKind::Connect => BridgeError::Connection(err),
                    AttemptKind::Reconnect => BridgeError::ConnectionClosed,
                };
                self.table.reject_all(&BridgeError::ConnectionClosed);
                self.queue.reject_all(&rejection);
            }
        }
    }

    /// Hand queued commands to the writer in submission order.
    fn flush(&mut self) {
        if !self.queue.is_empty() {
            debug!("Flushing {} queued commands", self.queue.len());
        }
        while self.is_open() {
            let Some(command) = self.queue.pop_front() else {
                break;
            };
            if !self.write(command) {
                break;
            }
        }
    }

    /// Hand one message to the writer and start its reply timer. If the
    /// writer has stopped, the command goes back to the head of the queue and
    /// the connection is treated as lost.
    fn write(&mut self, command: QueuedCommand) -> bool {
        let QueuedCommand {
            mut message,
            completion,
        } = command;
        message.ensure_timestamp();

        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                completion.fail(BridgeError::Protocol(e));
                return true;
            }
        };
        let max = self.config.transport.max_frame_size;
        if json.len() > max {
            let size = json.len();
            completion.fail(BridgeError::Protocol(ProtocolError::Framing(
                FramingError::FrameTooLarge { size, max },
            )));
            return true;
        }
        let Some(writer) = self.writer.as_ref() else {
            self.queue.push_front(QueuedCommand {
                message,
                completion,
            });
            return false;
        };

        trace!("Sending '{}' ({} bytes)", message.action, json.len());
        if writer.submit(json).is_err() {
            warn!("Writer stopped before '{}' was sent", message.action);
            self.queue.push_front(QueuedCommand {
                message,
                completion,
            });
            self.on_connection_lost(TransportError::ConnectionClosed);
            return false;
        }

        match completion {
            Completion::Reply { responder, timeout } => {
                self.table.insert(message.id, message.action, responder, timeout);
            }
            Completion::Written(responder) => {
                let _ = responder.send(Ok(()));
            }
        }
        true
    }

    fn on_frame(&mut self, frame: Option<Result<String, FramingError>>) {
        let raw = match frame {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                error!("Unrecoverable framing error: {}", e);
                self.on_connection_lost(TransportError::Framing(e));
                return;
            }
            None => {
                self.on_connection_lost(TransportError::ConnectionClosed);
                return;
            }
        };
        self.metrics.record_received(raw.len());

        let message = match Message::from_json(&raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping unparseable message: {}", e);
                return;
            }
        };

        if message.kind.is_reply() {
            match self.table.resolve(message) {
                Resolution::Resolved(elapsed) => {
                    self.metrics.update_latency_us(elapsed.as_micros() as u64);
                }
                Resolution::Unmatched => {
                    AtomicMetrics::incr(&self.metrics.unmatched_replies);
                    warn!("Dropping reply with no pending command");
                }
            }
        } else if self.events.send(message).is_err() {
            trace!("No subscribers for unsolicited message");
        }
    }

    /// Drop both halves of the socket. Returns whether one was open.
    fn close_link(&mut self) -> bool {
        self.writer = None;
        self.frames.take().is_some()
    }

    fn on_connection_lost(&mut self, reason: TransportError) {
        if !self.close_link() {
            return;
        }
        warn!(
            "Connection to {} lost: {}",
            self.connector.config().addr(),
            reason
        );

        if self.config.auto_reconnect && self.config.max_reconnect_attempts > 0 {
            self.start_reconnect();
        } else {
            self.set_state(ConnectionState::Disconnected);
            self.table.reject_all(&BridgeError::ConnectionClosed);
            self.queue.reject_all(&BridgeError::ConnectionClosed);
        }
    }

    /// Drop the socket and any in-flight attempt, failing every caller with `err`.
    fn teardown(&mut self, err: &BridgeError) {
        self.attempt = None;
        self.close_link();
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        self.table.reject_all(err);
        self.queue.reject_all(err);
        self.set_state(ConnectionState::Disconnected);
    }
}
