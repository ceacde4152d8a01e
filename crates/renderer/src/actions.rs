//! Bounded hand-off of work from other threads to the render thread.
//!
//! Any thread may hold an [`ActionSender`] and enqueue closures. The render
//! thread drains the queue at the start of every frame and runs each action
//! against the renderer. Capacity is fixed; when the queue is full the
//! configured [`QueuePolicy`] decides whether the sender blocks or the new
//! action is dropped.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use tracing::{trace, warn};
use vkframe_core::{ActionQueueConfig, QueuePolicy};

use crate::error::{RenderError, RenderResult};

/// Work to run on the render thread against a `T`.
pub type Action<T> = Box<dyn FnOnce(&mut T) -> RenderResult<()> + Send>;

/// What happened to an enqueued action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// The queue was full and the policy is `DropNewest`.
    Dropped,
}

/// Cloneable producer side of the action queue.
pub struct ActionSender<T> {
    tx: SyncSender<Action<T>>,
    policy: QueuePolicy,
}

impl<T> Clone for ActionSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            policy: self.policy,
        }
    }
}

impl<T> ActionSender<T> {
    /// Queues `action` for the next frame.
    ///
    /// # Errors
    ///
    /// [`RenderError::ActionChannelClosed`] once the receiving side is gone.
    pub fn enqueue<F>(&self, action: F) -> RenderResult<Enqueued>
    where
        F: FnOnce(&mut T) -> RenderResult<()> + Send + 'static,
    {
        let action: Action<T> = Box::new(action);
        match self.policy {
            QueuePolicy::Block => {
                self.tx
                    .send(action)
                    .map_err(|_| RenderError::ActionChannelClosed)?;
                Ok(Enqueued::Accepted)
            }
            QueuePolicy::DropNewest => match self.tx.try_send(action) {
                Ok(()) => Ok(Enqueued::Accepted),
                Err(TrySendError::Full(_)) => {
                    warn!("Action queue full, dropping action");
                    Ok(Enqueued::Dropped)
                }
                Err(TrySendError::Disconnected(_)) => Err(RenderError::ActionChannelClosed),
            },
        }
    }

    #[inline]
    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }
}

/// Consumer side, owned by the render thread.
pub struct ActionQueue<T> {
    rx: Receiver<Action<T>>,
}

impl<T> ActionQueue<T> {
    /// Takes every action queued so far without blocking.
    pub fn drain(&self) -> Vec<Action<T>> {
        let actions: Vec<_> = self.rx.try_iter().collect();
        if !actions.is_empty() {
            trace!("Drained {} queued action(s)", actions.len());
        }
        actions
    }
}

/// Creates a bounded action channel.
pub fn channel<T>(config: &ActionQueueConfig) -> (ActionSender<T>, ActionQueue<T>) {
    let (tx, rx) = mpsc::sync_channel(config.capacity);
    (
        ActionSender {
            tx,
            policy: config.policy,
        },
        ActionQueue { rx },
    )
}

/// Runs drained actions in order. A failing action is logged and the rest
/// still run.
pub fn run_all<T>(target: &mut T, actions: Vec<Action<T>>) -> usize {
    let mut failed = 0;
    for action in actions {
        if let Err(e) = action(target) {
            warn!("Queued action failed: {}", e);
            failed += 1;
        }
    }
    failed
}
