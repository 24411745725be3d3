//! TCP command server: one [`Bridge`] per connection over shared component state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uibridge_protocol::{Command, Message, Reply};
use uibridge_transport::{AtomicMetrics, TransportMetrics, frame_stream};

use crate::bridge::{Ack, Bridge};
use crate::components::ComponentStore;
use crate::config::PeerConfig;
use crate::error::{HandlerError, PeerError, PeerResult};
use crate::transport::ChannelTransport;

/// Stops a running [`PeerServer`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// Serves the command vocabulary (`ping`, `load_component`, `call_method`,
/// `get_state`, `get_events`, `shutdown`, `echo`, `add`) to bridge hosts.
#[derive(Debug)]
pub struct PeerServer {
    config: PeerConfig,
    listener: TcpListener,
    components: Arc<Mutex<ComponentStore>>,
    metrics: Arc<AtomicMetrics>,
    shutdown_tx: broadcast::Sender<()>,
}

impl PeerServer {
    /// Bind the listener.
    pub async fn bind(config: PeerConfig) -> PeerResult<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| PeerError::Bind {
                addr: config.addr(),
                reason: e.to_string(),
            })?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            listener,
            components: Arc::new(Mutex::new(ComponentStore::new())),
            metrics: Arc::new(AtomicMetrics::new()),
            shutdown_tx,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> PeerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// A handle that stops [`run`](Self::run) from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Shared component state.
    pub fn components(&self) -> Arc<Mutex<ComponentStore>> {
        Arc::clone(&self.components)
    }

    /// Shared traffic counters, summed over every connection.
    pub fn metrics(&self) -> Arc<AtomicMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Snapshot of the traffic counters.
    pub fn metrics_snapshot(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    /// Accept connections until a `shutdown` command or [`ShutdownHandle::shutdown`].
    pub async fn run(self) -> PeerResult<()> {
        info!("Peer listening on {}", self.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Peer received shutdown signal");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("Accepted connection from {}", addr);
                        let connection = Connection {
                            addr,
                            components: Arc::clone(&self.components),
                            metrics: Arc::clone(&self.metrics),
                            shutdown_tx: self.shutdown_tx.clone(),
                            shutdown_rx: self.shutdown_tx.subscribe(),
                            max_frame_size: self.config.max_frame_size,
                        };
                        connections.spawn(async move {
                            if let Err(e) = serve_connection(stream, connection).await {
                                error!("Connection handler failed for {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        return Err(PeerError::Io(e));
                    }
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection task ended abnormally: {}", e);
                    }
                }
            }
        }

        debug!("Waiting for {} connections to close", connections.len());
        while connections.join_next().await.is_some() {}
        info!("Peer shutdown complete");
        Ok(())
    }
}

/// Per-connection context. The shutdown receiver is subscribed before the
/// task is spawned so a signal sent in between is not missed.
struct Connection {
    addr: SocketAddr,
    components: Arc<Mutex<ComponentStore>>,
    metrics: Arc<AtomicMetrics>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    max_frame_size: usize,
}

async fn serve_connection(stream: TcpStream, connection: Connection) -> PeerResult<()> {
    let Connection {
        addr,
        components,
        metrics,
        shutdown_tx,
        mut shutdown_rx,
        max_frame_size,
    } = connection;
    let (mut sink, mut frames) = frame_stream(stream, max_frame_size).split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<String>();

    let writer_metrics = Arc::clone(&metrics);
    let writer = tokio::spawn(async move {
        while let Some(message) = outgoing_rx.recv().await {
            let len = message.len();
            if let Err(e) = sink.send(message).await {
                warn!("Failed to write to {}: {}", addr, e);
                break;
            }
            writer_metrics.record_sent(len);
        }
        let _ = sink.close().await;
    });

    let closing = Arc::new(AtomicBool::new(false));
    let bridge = Bridge::new(ChannelTransport::new(outgoing_tx));
    register_commands(&bridge, components, Arc::clone(&closing), shutdown_tx);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            frame = frames.next() => match frame {
                Some(Ok(raw)) => {
                    metrics.record_received(raw.len());
                    if let Ack::Rejected(reply) = bridge.receive_message(&raw) {
                        bridge.send_message(reply)?;
                    }
                    if closing.load(Ordering::Acquire) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Closing {} after framing error: {}", addr, e);
                    break;
                }
                None => {
                    debug!("{} closed the connection", addr);
                    break;
                }
            },
        }
    }

    // Dropping the bridge drops its sender; the writer flushes what is queued, then closes.
    drop(bridge);
    if let Err(e) = writer.await {
        error!("Writer task for {} failed: {}", addr, e);
    }
    info!("Connection from {} closed", addr);
    Ok(())
}

/// Register the command handlers on a connection's bridge.
pub fn register_commands(
    bridge: &Bridge,
    components: Arc<Mutex<ComponentStore>>,
    closing: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
) {
    for action in Command::ACTIONS {
        let components = Arc::clone(&components);
        let closing = Arc::clone(&closing);
        let shutdown_tx = shutdown_tx.clone();
        bridge.register_handler(*action, move |bridge, message| {
            if !message.kind.expects_reply() {
                debug!("Ignoring {} '{}'", message.kind, message.action);
                return Ok(());
            }
            let command = match Command::from_message(message) {
                Ok(command) => command,
                Err(e) => {
                    bridge.respond_error(message, e.code(), e.to_string())?;
                    return Ok(());
                }
            };
            let is_shutdown = matches!(command, Command::Shutdown {});

            match execute(command, &components) {
                Ok(reply) => bridge.respond(message, reply.into_value())?,
                Err(e) => bridge.respond_error(message, e.code(), e.to_string())?,
            }

            if is_shutdown {
                info!("Shutdown requested by host");
                closing.store(true, Ordering::Release);
                let _ = shutdown_tx.send(());
            }
            Ok(())
        });
    }

    // Host-originated events and state pushes land in the event log.
    let components = Arc::clone(&components);
    bridge.register_global_handler(move |_, message: &Message| {
        if !message.kind.expects_reply() && !message.kind.is_reply() {
            components.lock().record(
                "host_message",
                json!({
                    "type": message.kind,
                    "action": message.action,
                    "payload": message.payload,
                }),
            );
        }
        Ok(())
    });
}

fn execute(command: Command, components: &Mutex<ComponentStore>) -> Result<Reply, HandlerError> {
    let reply = match command {
        Command::Ping {} => Reply::ok().with_result(json!("pong")),
        Command::LoadComponent { config } => {
            let id = components.lock().load(&config)?;
            Reply::ok().with_id(id)
        }
        Command::CallMethod { id, method, args } => {
            let result = components.lock().call(&id, &method, &args)?;
            Reply::ok().with_result(result)
        }
        Command::GetState { id } => {
            let state = components.lock().state(&id)?;
            Reply::ok().with_state(state)
        }
        Command::GetEvents {} => {
            let events = components.lock().drain_events();
            Reply::ok().with_events(events)
        }
        Command::Shutdown {} => Reply::ok(),
        Command::Echo { data } => Reply::ok().with_data(data),
        Command::Add { a, b } => Reply::ok().with_result(number(a + b)),
    };
    Ok(reply)
}

/// Integral sums go out as JSON integers, so `2 + 3` reads back as `5`.
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}
