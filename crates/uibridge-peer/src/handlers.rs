//! Per-action and global message handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use uibridge_protocol::Message;

use crate::bridge::Bridge;
use crate::error::HandlerError;

/// A message handler. Receives the bridge it was invoked on so it can reply.
pub type Handler = Arc<dyn Fn(&Bridge, &Message) -> Result<(), HandlerError> + Send + Sync>;

/// Token returned by registration, used to unregister that exact handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone)]
struct Registration {
    id: HandlerId,
    handler: Handler,
}

#[derive(Default)]
struct Tables {
    by_action: HashMap<String, Vec<Registration>>,
    global: Vec<Registration>,
}

/// Dispatch table from action name to handlers, plus handlers for every message.
///
/// Handlers run in registration order. Lookups hand out a snapshot, so a handler
/// may register or unregister handlers while it runs.
#[derive(Default)]
pub struct HandlerRegistry {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        let mut actions: Vec<_> = tables.by_action.keys().cloned().collect();
        actions.sort();
        f.debug_struct("HandlerRegistry")
            .field("actions", &actions)
            .field("global_handlers", &tables.global.len())
            .finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register `handler` for `action`. Several handlers may share an action.
    pub fn register_handler<F>(&self, action: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&Bridge, &Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.tables
            .write()
            .by_action
            .entry(action.into())
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove one handler from `action`. Returns whether it was registered.
    pub fn unregister_handler(&self, action: &str, id: HandlerId) -> bool {
        let mut tables = self.tables.write();
        let Some(handlers) = tables.by_action.get_mut(action) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            tables.by_action.remove(action);
        }
        removed
    }

    /// Register a handler that sees every inbound message.
    pub fn register_global_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Bridge, &Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.tables.write().global.push(Registration {
            id,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a global handler. Returns whether it was registered.
    pub fn unregister_global_handler(&self, id: HandlerId) -> bool {
        let mut tables = self.tables.write();
        let before = tables.global.len();
        tables.global.retain(|r| r.id != id);
        tables.global.len() != before
    }

    /// Whether any handler is registered for `action`.
    pub fn has_handler(&self, action: &str) -> bool {
        self.tables.read().by_action.contains_key(action)
    }

    /// Handlers for `action`, in registration order.
    pub fn handlers_for(&self, action: &str) -> Vec<Handler> {
        self.tables
            .read()
            .by_action
            .get(action)
            .map(|handlers| handlers.iter().map(|r| Arc::clone(&r.handler)).collect())
            .unwrap_or_default()
    }

    /// Global handlers, in registration order.
    pub fn global_handlers(&self) -> Vec<Handler> {
        self.tables
            .read()
            .global
            .iter()
            .map(|r| Arc::clone(&r.handler))
            .collect()
    }
}
