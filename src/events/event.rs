//! # Runtime events emitted by the node.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **State machine events**: transitions and engine failures of any FSM
//! - **Coordination events**: master election and topology propagation
//! - **Task events**: computation task start and outcome
//! - **Runtime events**: shutdown progress and subscriber health
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use clustervisor::{Event, EventKind};
//!
//! let ev = Event::state_changed("compute", "Configured", "Start", "Executing");
//!
//! assert_eq!(ev.kind, EventKind::StateChanged);
//! assert_eq!(ev.fsm.as_deref(), Some("compute"));
//! assert_eq!(ev.from.as_deref(), Some("Configured"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets `task` (subscriber name) and `reason` (panic info).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets `task` (subscriber name) and `reason`.
    SubscriberOverflow,

    // === State machine events ===
    /// A state machine completed a transition.
    ///
    /// Sets `fsm`, `from`, `event`, `to`.
    StateChanged,

    /// A state machine became failed and terminated.
    ///
    /// Sets `fsm`, `from`, `event` (when known) and `reason`.
    TransitionFailed,

    // === Coordination events ===
    /// This node elected itself master.
    ///
    /// Sets `node`.
    MasterElected,

    /// This node cached a freshly published topology graph.
    ///
    /// Sets `node` and `reason` (topology type).
    TopologyConfigured,

    // === Task events ===
    /// A computation task was scheduled.
    ///
    /// Sets `task`.
    TaskStarted,

    /// A computation task finished successfully.
    ///
    /// Sets `task`.
    TaskFinished,

    /// A computation task failed.
    ///
    /// Sets `task` and `reason`.
    TaskFailed,

    /// A computation task stopped after cancellation.
    ///
    /// Sets `task`.
    TaskCancelled,

    // === Runtime events ===
    /// Shutdown requested (OS signal or explicit call).
    ShutdownRequested,

    /// All services terminated within the configured grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some services did not terminate in time.
    ///
    /// Sets `reason` with the stuck service names.
    GraceExceeded,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Name of the state machine, if applicable.
    pub fsm: Option<Arc<str>>,
    /// Source state of a transition.
    pub from: Option<Arc<str>>,
    /// Triggering fsm event of a transition.
    pub event: Option<Arc<str>>,
    /// Resolved target state of a transition.
    pub to: Option<Arc<str>>,
    /// Node identifier, if applicable.
    pub node: Option<Arc<str>>,
    /// Task or subscriber name, if applicable.
    pub task: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            fsm: None,
            from: None,
            event: None,
            to: None,
            node: None,
            task: None,
            reason: None,
        }
    }

    /// Attaches a state machine name.
    #[inline]
    pub fn with_fsm(mut self, fsm: impl Into<Arc<str>>) -> Self {
        self.fsm = Some(fsm.into());
        self
    }

    /// Attaches a node identifier.
    #[inline]
    pub fn with_node(mut self, node: impl Into<Arc<str>>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Attaches a task name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a transition notification.
    pub fn state_changed(
        fsm: impl Into<Arc<str>>,
        from: impl Into<Arc<str>>,
        event: impl Into<Arc<str>>,
        to: impl Into<Arc<str>>,
    ) -> Self {
        let mut ev = Event::new(EventKind::StateChanged).with_fsm(fsm);
        ev.from = Some(from.into());
        ev.event = Some(event.into());
        ev.to = Some(to.into());
        ev
    }

    /// Creates an engine failure notification.
    pub fn transition_failed(
        fsm: impl Into<Arc<str>>,
        from: impl Into<Arc<str>>,
        event: Option<String>,
        reason: impl Into<Arc<str>>,
    ) -> Self {
        let mut ev = Event::new(EventKind::TransitionFailed)
            .with_fsm(fsm)
            .with_reason(reason);
        ev.from = Some(from.into());
        ev.event = event.map(Arc::from);
        ev
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
