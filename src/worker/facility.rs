//! Communication facility contract.

use std::sync::Arc;

use super::{WorkerMessage, WorkerMessageType};
use crate::error::SetupError;
use crate::task::Dependencies;

/// Pluggable, message-type-scoped listener attached to the dispatcher.
///
/// `on_message` runs on the publishing thread and must not block.
pub trait CommunicationFacility: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Message types this facility wants to see.
    fn subscribed_types(&self) -> &[WorkerMessageType];

    /// Handles `message`; `true` stops propagation to later facilities and built-ins.
    fn on_message(&self, message: &WorkerMessage) -> bool;

    /// Called once when the worker's readiness gate opens.
    fn start(&self) {}

    /// Called on `CLEAN`; drops per-computation state.
    fn reset(&self) {}

    /// Called on worker stop.
    fn stop(&self) {}

    /// Registers this facility into a computation's dependency registry.
    fn provide(self: Arc<Self>, dependencies: &Dependencies) -> Result<(), SetupError>;
}
