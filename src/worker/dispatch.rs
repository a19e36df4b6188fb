//! # Worker message dispatch.
//!
//! ```text
//!  worker/channel ─► recipient filter ─► facilities subscribed to the type (in order)
//!                        │ (not for us:        │ first returning true consumes
//!                        ▼  Discarded)         ▼ none consumed
//!                                         built-in handler ─► computation FSM event
//! ```

use std::sync::Arc;

use parking_lot::RwLock;

use super::{CommunicationFacility, ComputationEvent, WorkerMessage, WorkerMessageType};
use crate::fsm::EventSender;
use crate::node::NodeId;

/// What happened to one inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// This node is not a recipient.
    Discarded,
    /// A facility consumed it.
    Consumed(String),
    /// A built-in handler turned it into a computation event.
    Handled(ComputationEvent),
    /// Nobody wanted it.
    Unhandled,
}

/// Built-in mapping from control message type to computation event.
pub fn builtin_event(kind: WorkerMessageType) -> Option<ComputationEvent> {
    match kind {
        WorkerMessageType::LoadConfiguration => Some(ComputationEvent::Configure),
        WorkerMessageType::StartComputation => Some(ComputationEvent::Start),
        WorkerMessageType::PauseComputation => Some(ComputationEvent::Pause),
        WorkerMessageType::ResumeComputation => Some(ComputationEvent::Resume),
        WorkerMessageType::CancelComputation => Some(ComputationEvent::Cancel),
        WorkerMessageType::CleanConfiguration => Some(ComputationEvent::Clean),
        WorkerMessageType::BroadcastMessage
        | WorkerMessageType::UnicastControl
        | WorkerMessageType::UnicastMessage => None,
    }
}

pub struct MessageDispatcher {
    node: NodeId,
    facilities: RwLock<Vec<Arc<dyn CommunicationFacility>>>,
    computation: EventSender<ComputationEvent>,
}

impl MessageDispatcher {
    pub fn new(node: NodeId, computation: EventSender<ComputationEvent>) -> Self {
        Self {
            node,
            facilities: RwLock::new(Vec::new()),
            computation,
        }
    }

    /// Appends a facility; registration order is consultation order.
    pub fn register(&self, facility: Arc<dyn CommunicationFacility>) {
        tracing::debug!(node = %self.node, facility = facility.name(), types = ?facility.subscribed_types(), "facility registered");
        self.facilities.write().push(facility);
    }

    pub fn facilities(&self) -> Vec<Arc<dyn CommunicationFacility>> {
        self.facilities.read().clone()
    }

    pub fn dispatch(&self, message: &WorkerMessage) -> Delivery {
        if !message.is_recipient(&self.node) {
            tracing::trace!(node = %self.node, kind = ?message.kind, "message not addressed to this node");
            return Delivery::Discarded;
        }

        let interested: Vec<Arc<dyn CommunicationFacility>> = self
            .facilities
            .read()
            .iter()
            .filter(|f| f.subscribed_types().contains(&message.kind))
            .cloned()
            .collect();
        for facility in interested {
            if facility.on_message(message) {
                return Delivery::Consumed(facility.name().to_string());
            }
        }

        match builtin_event(message.kind) {
            Some(event) => {
                tracing::debug!(node = %self.node, kind = ?message.kind, ?event, "control message");
                self.computation.fire(event);
                Delivery::Handled(event)
            }
            None => {
                tracing::debug!(node = %self.node, kind = ?message.kind, "unhandled message");
                Delivery::Unhandled
            }
        }
    }
}
