//! # LogWriter: bus events rendered through `tracing`
//!
//! A minimal subscriber that turns every [`Event`] into one structured `tracing`
//! record. Install a `tracing-subscriber` to see the output.
//!
//! ## Example output
//! ```text
//! INFO clustervisor: transition fsm="topology" from="Starting" event="Started" to="MasterElectedMaster"
//! INFO clustervisor: master elected node="node-3"
//! WARN clustervisor: task failed task="pi" reason="execution failed: boom"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let fsm = e.fsm.as_deref().unwrap_or("-");
        let task = e.task.as_deref().unwrap_or("-");
        let node = e.node.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::StateChanged => tracing::info!(
                seq = e.seq,
                fsm,
                from = e.from.as_deref().unwrap_or("-"),
                event = e.event.as_deref().unwrap_or("-"),
                to = e.to.as_deref().unwrap_or("-"),
                "transition"
            ),
            EventKind::TransitionFailed => {
                tracing::error!(seq = e.seq, fsm, reason, "state machine failed")
            }
            EventKind::MasterElected => tracing::info!(seq = e.seq, node, "master elected"),
            EventKind::TopologyConfigured => {
                tracing::info!(seq = e.seq, node, kind = reason, "topology configured")
            }
            EventKind::TaskStarted => tracing::info!(seq = e.seq, task, "task started"),
            EventKind::TaskFinished => tracing::info!(seq = e.seq, task, "task finished"),
            EventKind::TaskCancelled => tracing::info!(seq = e.seq, task, "task cancelled"),
            EventKind::TaskFailed => tracing::warn!(seq = e.seq, task, reason, "task failed"),
            EventKind::ShutdownRequested => tracing::info!(seq = e.seq, "shutdown requested"),
            EventKind::AllStoppedWithin => {
                tracing::info!(seq = e.seq, "all services stopped within grace")
            }
            EventKind::GraceExceeded => {
                tracing::warn!(seq = e.seq, stuck = reason, "grace exceeded")
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(seq = e.seq, subscriber = task, reason, "subscriber overflow")
            }
            EventKind::SubscriberPanicked => {
                tracing::error!(seq = e.seq, subscriber = task, reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
