//! The peer's send/receive surface.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, trace, warn};
use uibridge_protocol::{ErrorCode, Message, MessageType};

use crate::error::{HandlerError, PeerResult};
use crate::handlers::{Handler, HandlerId, HandlerRegistry};
use crate::inbox::Inbox;
use crate::transport::PeerTransport;

/// Result of handing a raw message to [`Bridge::receive_message`].
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    /// The message parsed and was queued for dispatch.
    Accepted,
    /// The message did not parse; carries the `parse_error` reply to send back.
    Rejected(Message),
}

impl Ack {
    /// Whether the message was accepted.
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

struct BridgeInner {
    registry: HandlerRegistry,
    inbox: Inbox,
    transport: Box<dyn PeerTransport>,
}

/// Peer-side bridge: dispatches inbound messages to registered handlers and
/// sends replies and events to the host through a [`PeerTransport`].
///
/// Inbound messages are processed one at a time in arrival order. A handler
/// that feeds another message into the bridge does not recurse: the message is
/// queued and handled after the current one finishes.
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use uibridge_peer::{Bridge, BufferTransport};
/// use uibridge_protocol::Message;
///
/// let out = Arc::new(BufferTransport::new());
/// let bridge = Bridge::new(Arc::clone(&out));
/// bridge.register_handler("greet", |bridge, msg| {
///     bridge.respond(msg, json!({"success": true, "result": "hi"}))?;
///     Ok(())
/// });
///
/// let request = Message::request("greet", json!({}));
/// assert!(bridge.receive_message(&request.to_json().unwrap()).is_accepted());
///
/// let reply = Message::from_json(&out.take()[0]).unwrap();
/// assert_eq!(reply.correlation_id.as_deref(), Some(request.id.as_str()));
/// ```
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("registry", &self.inner.registry)
            .field("transport", &self.inner.transport)
            .finish()
    }
}

impl Bridge {
    /// Create a bridge that delivers outgoing messages through `transport`.
    pub fn new(transport: impl PeerTransport + 'static) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                registry: HandlerRegistry::new(),
                inbox: Inbox::default(),
                transport: Box::new(transport),
            }),
        }
    }

    /// The handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// See [`HandlerRegistry::register_handler`].
    pub fn register_handler<F>(&self, action: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&Self, &Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.registry.register_handler(action, handler)
    }

    /// See [`HandlerRegistry::unregister_handler`].
    pub fn unregister_handler(&self, action: &str, id: HandlerId) -> bool {
        self.inner.registry.unregister_handler(action, id)
    }

    /// See [`HandlerRegistry::register_global_handler`].
    pub fn register_global_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Self, &Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.registry.register_global_handler(handler)
    }

    /// Parse one framed message and dispatch it.
    ///
    /// Unparseable input is not dispatched; the returned [`Ack::Rejected`]
    /// carries a `parse_error` reply, correlated to the input's `id` when one
    /// can be read.
    pub fn receive_message(&self, raw: &str) -> Ack {
        match Message::from_json(raw) {
            Ok(message) => {
                self.dispatch(message);
                Ack::Accepted
            }
            Err(e) => {
                warn!("Rejecting unparseable message: {}", e);
                let correlation_id = serde_json::from_str::<Value>(raw)
                    .ok()
                    .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string));
                Ack::Rejected(Self::create_error_response(
                    correlation_id,
                    ErrorCode::ParseError,
                    e.to_string(),
                ))
            }
        }
    }

    /// Queue a parsed message and process the queue unless a drain is already
    /// running further up the stack or on another thread.
    pub fn dispatch(&self, message: Message) {
        self.inner.inbox.push(message);
        let Some(drain) = self.inner.inbox.begin_drain() else {
            trace!("Drain in progress, message queued");
            return;
        };
        while let Some(message) = drain.next() {
            self.process(&message);
        }
    }

    fn process(&self, message: &Message) {
        debug!("Dispatching {} '{}' ({})", message.kind, message.action, message.id);
        let handlers = self.inner.registry.handlers_for(&message.action);

        if handlers.is_empty() && message.kind.expects_reply() {
            let reply = Self::create_error_response(
                Some(message.id.clone()),
                ErrorCode::UnknownCommand,
                format!("Unknown command: {}", message.action),
            );
            if let Err(e) = self.send_message(reply) {
                error!("Failed to reply to unknown command '{}': {}", message.action, e);
            }
        }

        for handler in handlers {
            self.invoke(&handler, message);
        }
        for handler in self.inner.registry.global_handlers() {
            self.invoke(&handler, message);
        }
    }

    fn invoke(&self, handler: &Handler, message: &Message) {
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(self, message)))
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(&*panic))));
        if let Err(e) = outcome {
            error!("Handler for '{}' failed: {}", message.action, e);
        }
    }

    /// Send a message to the host, stamping it with the current time if it
    /// has no timestamp.
    pub fn send_message(&self, mut message: Message) -> PeerResult<()> {
        message.ensure_timestamp();
        let json = message.to_json()?;
        trace!("Delivering '{}' ({} bytes)", message.action, json.len());
        self.inner.transport.deliver(json)
    }

    /// Build a message with an explicit ID.
    pub fn create_message(
        id: impl Into<String>,
        kind: MessageType,
        action: impl Into<String>,
        payload: Value,
    ) -> Message {
        Message::create(id, kind, action, payload)
    }

    /// Build an `error` reply carrying `{success: false, error: {code, message}}`.
    pub fn create_error_response(
        correlation_id: Option<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Message {
        Message::error_response(correlation_id, code, message)
    }

    /// Reply to `request` with `payload`.
    pub fn respond(&self, request: &Message, payload: Value) -> PeerResult<()> {
        self.send_message(Message::response_to(request, payload))
    }

    /// Reply to `request` with an error.
    pub fn respond_error(
        &self,
        request: &Message,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> PeerResult<()> {
        self.send_message(Self::create_error_response(
            Some(request.id.clone()),
            code,
            message,
        ))
    }

    /// Send an unsolicited `event` to the host.
    pub fn emit(&self, action: impl Into<String>, payload: Value) -> PeerResult<()> {
        self.send_message(Message::event(action, payload))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BufferTransport;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn bridge() -> (Bridge, Arc<BufferTransport>) {
        let out = Arc::new(BufferTransport::new());
        (Bridge::new(Arc::clone(&out)), out)
    }

    fn sent(out: &BufferTransport) -> Vec<Message> {
        out.take()
            .iter()
            .map(|raw| Message::from_json(raw).unwrap())
            .collect()
    }

    #[test]
    fn test_action_handlers_then_globals_in_order() {
        let (bridge, _) = bridge();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let log = Arc::clone(&log);
            bridge.register_handler("open", move |_, _| {
                log.lock().push(name);
                Ok(())
            });
        }
        let global_log = Arc::clone(&log);
        bridge.register_global_handler(move |_, _| {
            global_log.lock().push("global");
            Ok(())
        });

        bridge.dispatch(Message::event("open", json!({})));
        assert_eq!(*log.lock(), ["first", "second", "global"]);
    }

    #[test]
    fn test_reentrant_dispatch_is_deferred() {
        let (bridge, _) = bridge();
        let log = Arc::new(Mutex::new(Vec::new()));

        let outer_log = Arc::clone(&log);
        bridge.register_handler("outer", move |bridge, _| {
            outer_log.lock().push("outer:start");
            bridge.dispatch(Message::event("inner", json!({})));
            outer_log.lock().push("outer:end");
            Ok(())
        });
        let inner_log = Arc::clone(&log);
        bridge.register_handler("inner", move |_, _| {
            inner_log.lock().push("inner");
            Ok(())
        });

        bridge.dispatch(Message::event("outer", json!({})));
        assert_eq!(*log.lock(), ["outer:start", "outer:end", "inner"]);
    }

    #[test]
    fn test_failing_and_panicking_handlers_are_isolated() {
        let (bridge, _) = bridge();
        let reached = Arc::new(Mutex::new(0));

        bridge.register_handler("tick", |_, _| Err(HandlerError::Failed("nope".into())));
        bridge.register_handler("tick", |_, _| panic!("handler blew up"));
        let counter = Arc::clone(&reached);
        bridge.register_handler("tick", move |_, _| {
            *counter.lock() += 1;
            Ok(())
        });

        bridge.dispatch(Message::event("tick", json!({})));
        bridge.dispatch(Message::event("tick", json!({})));
        assert_eq!(*reached.lock(), 2);
    }

    #[test]
    fn test_unknown_request_gets_error_reply() {
        let (bridge, out) = bridge();
        let request = Message::request("frobnicate", json!({}));
        bridge.dispatch(request.clone());

        let replies = sent(&out);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind, MessageType::Error);
        assert_eq!(replies[0].correlation_id.as_deref(), Some(request.id.as_str()));
        assert!(replies[0].error_payload().unwrap().is(ErrorCode::UnknownCommand));
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let (bridge, out) = bridge();
        bridge.dispatch(Message::event("frobnicate", json!({})));
        assert!(out.take().is_empty());
    }

    #[test]
    fn test_parse_error_is_rejected_with_correlation() {
        let (bridge, _) = bridge();
        match bridge.receive_message(r#"{"id":"req-3","type":"bogus"}"#) {
            Ack::Rejected(reply) => {
                assert_eq!(reply.correlation_id.as_deref(), Some("req-3"));
                assert!(reply.error_payload().unwrap().is(ErrorCode::ParseError));
            }
            Ack::Accepted => panic!("expected rejection"),
        }

        match bridge.receive_message("not json") {
            Ack::Rejected(reply) => assert_eq!(reply.correlation_id, None),
            Ack::Accepted => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_send_message_stamps_timestamp() {
        let (bridge, out) = bridge();
        let message = Bridge::create_message("e1", MessageType::Event, "tick", json!({}));
        assert_eq!(message.timestamp, None);

        bridge.send_message(message).unwrap();
        let delivered = sent(&out);
        assert!(delivered[0].timestamp.is_some());
        assert_eq!(delivered[0].id, "e1");
    }

    /// Panics on its first delivery, then behaves.
    #[derive(Debug, Default)]
    struct FlakyTransport {
        failed_once: std::sync::atomic::AtomicBool,
    }

    impl PeerTransport for FlakyTransport {
        fn deliver(&self, _serialized: String) -> PeerResult<()> {
            if !self.failed_once.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("transport blew up");
            }
            Ok(())
        }
    }

    #[test]
    fn test_panic_outside_handlers_does_not_wedge_dispatch() {
        let bridge = Bridge::new(FlakyTransport::default());
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        bridge.register_handler("tick", move |_, _| {
            *counter.lock() += 1;
            Ok(())
        });

        // The unknown-command reply is sent outside any handler.
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            bridge.dispatch(Message::request("frobnicate", json!({})));
        }));
        assert!(outcome.is_err());

        bridge.dispatch(Message::event("tick", json!({})));
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_unregistered_handler_stops_running() {
        let (bridge, _) = bridge();
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let id = bridge.register_handler("tick", move |_, _| {
            *counter.lock() += 1;
            Ok(())
        });

        bridge.dispatch(Message::event("tick", json!({})));
        assert!(bridge.unregister_handler("tick", id));
        bridge.dispatch(Message::event("tick", json!({})));
        assert_eq!(*count.lock(), 1);
    }
}
