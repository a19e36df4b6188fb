//! Neighbour broadcast for tasks.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{SetupError, WorkerError};
use crate::store::{Listener, Listeners, SubscriptionId, TypedChannel};
use crate::task::{Dependencies, dependencies};
use crate::topology::TopologyService;
use crate::worker::{CommunicationFacility, WorkerMessage, WorkerMessageType};

/// Sends opaque payloads to every topology neighbour of this node.
pub struct BroadcastMessenger {
    channel: TypedChannel<WorkerMessage>,
    topology: Arc<TopologyService>,
    listeners: Listeners<Bytes>,
}

impl BroadcastMessenger {
    pub fn new(channel: TypedChannel<WorkerMessage>, topology: Arc<TopologyService>) -> Self {
        Self {
            channel,
            topology,
            listeners: Listeners::default(),
        }
    }

    /// Publishes `payload` to the current neighbours.
    ///
    /// # Errors
    /// [`WorkerError::Topology`] before a topology is known; store errors on publish.
    pub fn send(&self, payload: Bytes) -> Result<(), WorkerError> {
        let neighbours = self.topology.neighbours()?;
        tracing::trace!(node = %self.topology.node(), to = neighbours.len(), "broadcast send");
        self.channel.publish(&WorkerMessage::targeted(
            WorkerMessageType::BroadcastMessage,
            neighbours,
            payload,
        ))?;
        Ok(())
    }

    pub fn subscribe(&self, listener: impl Fn(&Bytes) + Send + Sync + 'static) -> SubscriptionId {
        let listener: Listener<Bytes> = Arc::new(listener);
        self.listeners.add(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.remove(id);
    }
}

impl CommunicationFacility for BroadcastMessenger {
    fn name(&self) -> &str {
        "broadcast-messenger"
    }

    fn subscribed_types(&self) -> &[WorkerMessageType] {
        &[WorkerMessageType::BroadcastMessage]
    }

    fn on_message(&self, message: &WorkerMessage) -> bool {
        if let Some(payload) = &message.payload {
            self.listeners.notify(payload);
        }
        true
    }

    fn reset(&self) {
        self.listeners.clear();
    }

    fn provide(self: Arc<Self>, deps: &Dependencies) -> Result<(), SetupError> {
        deps.register(dependencies::names::BROADCAST_MESSENGER, self)
    }
}
