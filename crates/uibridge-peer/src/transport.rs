//! How the peer delivers serialized messages to the host.

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{PeerError, PeerResult};

/// Outbound path from the peer to the host.
///
/// Delivery is synchronous so handlers can reply without suspending.
pub trait PeerTransport: Send + Sync + fmt::Debug {
    /// Hand one serialized message to the host.
    fn deliver(&self, serialized: String) -> PeerResult<()>;
}

/// Delivers into a connection's writer task.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    outgoing: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    /// Deliver into `outgoing`.
    pub fn new(outgoing: mpsc::UnboundedSender<String>) -> Self {
        Self { outgoing }
    }
}

impl PeerTransport for ChannelTransport {
    fn deliver(&self, serialized: String) -> PeerResult<()> {
        self.outgoing.send(serialized).map_err(|_| PeerError::Closed)
    }
}

/// Host-side entry point for [`CallbackTransport`]: invoke `function` with one
/// string argument.
pub trait HostInvoker: Send + Sync {
    /// Call the named host function.
    fn invoke(&self, function: &str, argument: &str) -> PeerResult<()>;
}

impl<F> HostInvoker for F
where
    F: Fn(&str, &str) -> PeerResult<()> + Send + Sync,
{
    fn invoke(&self, function: &str, argument: &str) -> PeerResult<()> {
        self(function, argument)
    }
}

/// Reverse path for peers that cannot open a socket: the message JSON is
/// quoted as a single-quoted string literal and passed to a named host
/// function, which routes it back into the host's receive path.
pub struct CallbackTransport<I> {
    function: String,
    invoker: I,
}

impl<I> fmt::Debug for CallbackTransport<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTransport")
            .field("function", &self.function)
            .finish_non_exhaustive()
    }
}

impl<I: HostInvoker> CallbackTransport<I> {
    /// Deliver by calling `function` through `invoker`.
    pub fn new(function: impl Into<String>, invoker: I) -> Self {
        Self {
            function: function.into(),
            invoker,
        }
    }

    /// Name of the host function.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Escape `json` for a single-quoted literal: backslashes first, then quotes.
    pub fn escape(json: &str) -> String {
        json.replace('\\', "\\\\").replace('\'', "\\'")
    }

    /// Undo [`escape`](Self::escape).
    pub fn unescape(argument: &str) -> String {
        let mut out = String::with_capacity(argument.len());
        let mut chars = argument.chars();
        while let Some(c) = chars.next() {
            if c == '\\'
                && let Some(next) = chars.next()
            {
                out.push(next);
                continue;
            }
            out.push(c);
        }
        out
    }

    /// The call expression the host would evaluate, e.g. `receive('{…}')`.
    pub fn render(&self, json: &str) -> String {
        format!("{}('{}')", self.function, Self::escape(json))
    }
}

impl<I: HostInvoker> PeerTransport for CallbackTransport<I> {
    fn deliver(&self, serialized: String) -> PeerResult<()> {
        self.invoker
            .invoke(&self.function, &Self::escape(&serialized))
    }
}

/// Collects delivered messages in memory. Useful when embedding the bridge
/// behind a host that polls for output.
#[derive(Debug, Default)]
pub struct BufferTransport {
    delivered: Mutex<Vec<String>>,
}

impl BufferTransport {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything delivered so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.delivered.lock())
    }
}

impl PeerTransport for BufferTransport {
    fn deliver(&self, serialized: String) -> PeerResult<()> {
        self.delivered.lock().push(serialized);
        Ok(())
    }
}

impl<T: PeerTransport + ?Sized> PeerTransport for std::sync::Arc<T> {
    fn deliver(&self, serialized: String) -> PeerResult<()> {
        (**self).deliver(serialized)
    }
}
