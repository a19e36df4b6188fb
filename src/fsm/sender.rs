//! Queue handle usable before the machine exists.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::Label;

/// Clonable producer side of a machine's event queue.
///
/// Obtained from [`StateMachineBuilder::sender`](super::StateMachineBuilder::sender)
/// so that actions and store listeners can fire events into the machine they belong
/// to without holding the machine itself. Events sent before `build()` are processed
/// once the dispatcher starts.
#[derive(Clone)]
pub struct EventSender<E> {
    fsm: Arc<str>,
    tx: mpsc::UnboundedSender<E>,
}

impl<E: Label> EventSender<E> {
    pub(crate) fn new(fsm: Arc<str>, tx: mpsc::UnboundedSender<E>) -> Self {
        Self { fsm, tx }
    }

    /// Enqueues `event`; never blocks.
    pub fn fire(&self, event: E) {
        if self.tx.send(event).is_err() {
            tracing::debug!(fsm = %self.fsm, event = ?event, "state machine gone; event dropped");
        }
    }
}
