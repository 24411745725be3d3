//! FIFO of inbound messages with a single drainer.

use std::collections::VecDeque;

use parking_lot::Mutex;
use uibridge_protocol::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainState {
    Idle,
    Draining,
}

#[derive(Debug)]
struct InboxInner {
    messages: VecDeque<Message>,
    state: DrainState,
}

/// Inbound messages waiting to be dispatched.
///
/// `Idle → Draining → Idle`: whoever wins [`begin_drain`](Self::begin_drain)
/// pulls messages until the queue is empty; anyone pushing meanwhile, including
/// a handler running inside the drain, only appends.
#[derive(Debug)]
pub(crate) struct Inbox {
    inner: Mutex<InboxInner>,
}

impl Default for Inbox {
    fn default() -> Self {
        Self {
            inner: Mutex::new(InboxInner {
                messages: VecDeque::new(),
                state: DrainState::Idle,
            }),
        }
    }
}

impl Inbox {
    pub(crate) fn push(&self, message: Message) {
        self.inner.lock().messages.push_back(message);
    }

    /// Claim the drain. Returns `None` if a drain is already running.
    pub(crate) fn begin_drain(&self) -> Option<Drain<'_>> {
        let mut inner = self.inner.lock();
        if inner.state == DrainState::Draining {
            return None;
        }
        inner.state = DrainState::Draining;
        Some(Drain { inbox: self })
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }
}

/// The claimed drain of an [`Inbox`].
///
/// If a panic unwinds through the drainer, dropping the guard returns the
/// inbox to `Idle` so later messages are still processed.
#[derive(Debug)]
pub(crate) struct Drain<'a> {
    inbox: &'a Inbox,
}

impl Drain<'_> {
    /// Next message to process. Returning `None` also ends the drain, under
    /// the same lock, so a concurrent push is never stranded.
    pub(crate) fn next(&self) -> Option<Message> {
        let mut inner = self.inbox.inner.lock();
        let message = inner.messages.pop_front();
        if message.is_none() {
            inner.state = DrainState::Idle;
        }
        message
    }
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.inbox.inner.lock().state = DrainState::Idle;
        }
    }
}
