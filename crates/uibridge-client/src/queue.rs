//! Commands waiting for the connection to become ready.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::oneshot;
use uibridge_protocol::Message;

use crate::error::{BridgeError, BridgeResult};

/// How the caller learns the outcome of an outgoing message.
#[derive(Debug)]
pub(crate) enum Completion {
    /// Wait for the correlated reply.
    Reply {
        responder: oneshot::Sender<BridgeResult<Message>>,
        timeout: Duration,
    },
    /// Resolve as soon as the message is handed to the socket writer.
    Written(oneshot::Sender<BridgeResult<()>>),
}

impl Completion {
    /// Settle the caller with `err`. A caller that stopped waiting is ignored.
    pub(crate) fn fail(self, err: BridgeError) {
        match self {
            Self::Reply { responder, .. } => {
                let _ = responder.send(Err(err));
            }
            Self::Written(responder) => {
                let _ = responder.send(Err(err));
            }
        }
    }
}

/// An outgoing message and its caller.
#[derive(Debug)]
pub(crate) struct QueuedCommand {
    pub(crate) message: Message,
    pub(crate) completion: Completion,
}

/// FIFO of commands submitted while the connection was not ready.
#[derive(Debug, Default)]
pub(crate) struct CommandQueue {
    items: VecDeque<QueuedCommand>,
}

impl CommandQueue {
    pub(crate) fn push(&mut self, command: QueuedCommand) {
        self.items.push_back(command);
    }

    /// Put a command back at the head, ahead of everything submitted after it.
    pub(crate) fn push_front(&mut self, command: QueuedCommand) {
        self.items.push_front(command);
    }

    pub(crate) fn pop_front(&mut self) -> Option<QueuedCommand> {
        self.items.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Fail every queued command, oldest first.
    pub(crate) fn reject_all(&mut self, err: &BridgeError) {
        for command in self.items.drain(..) {
            command.completion.fail(err.clone());
        }
    }
}
