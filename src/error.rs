//! Error types used by the clustervisor runtime, its state machines and tasks.
//!
//! This module defines one error enum per concern:
//!
//! - [`FsmError`] engine-level failures of a state machine (construction and dispatch).
//! - [`StoreError`] failures of the distributed store / channel backend.
//! - [`TopologyError`] topology queries made in the wrong state.
//! - [`SetupError`] task construction and dependency wiring failures.
//! - [`TaskError`] failures raised by a running computation task.
//! - [`WorkerError`] worker-side lifecycle failures (readiness, setup propagation).
//! - [`RuntimeError`] node-level orchestration failures (shutdown grace).
//!
//! Every enum provides `as_label` returning a short stable snake_case label for logs.

use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the FSM engine.
///
/// Construction errors are returned from `build()`; every other variant is
/// fatal to the owning state machine (it becomes failed and terminated).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FsmError {
    /// The builder was not given an initial state.
    #[error("fsm '{fsm}': initial state not set")]
    MissingInitial {
        /// Name of the state machine.
        fsm: String,
    },

    /// The builder was not given any terminal state.
    #[error("fsm '{fsm}': terminal states not set")]
    MissingTerminal {
        /// Name of the state machine.
        fsm: String,
    },

    /// A transition was declared with an empty target set.
    #[error("fsm '{fsm}': transition {state} --{event}--> has no targets")]
    EmptyTargets {
        /// Name of the state machine.
        fsm: String,
        /// Source state (debug rendering).
        state: String,
        /// Triggering event (debug rendering).
        event: String,
    },

    /// A multi-target transition finished without the action choosing a target.
    #[error("fsm '{fsm}': transition {state} --{event}--> did not resolve a target state")]
    UnresolvedTarget {
        /// Name of the state machine.
        fsm: String,
        /// Source state (debug rendering).
        state: String,
        /// Triggering event (debug rendering).
        event: String,
    },

    /// An action requested a state which is not a declared target of its transition.
    #[error("fsm '{fsm}': state {target} is not a permitted target of {state} --{event}-->")]
    IllegalTarget {
        /// Name of the state machine.
        fsm: String,
        /// Source state (debug rendering).
        state: String,
        /// Triggering event (debug rendering).
        event: String,
        /// Requested target (debug rendering).
        target: String,
    },

    /// A transition action returned an error.
    #[error("fsm '{fsm}': action of {state} --{event}--> failed: {source}")]
    ActionFailed {
        /// Name of the state machine.
        fsm: String,
        /// Source state (debug rendering).
        state: String,
        /// Triggering event (debug rendering).
        event: String,
        /// The error returned by the action.
        #[source]
        source: anyhow::Error,
    },

    /// The machine was failed from the outside through `fail_with`.
    #[error("fsm '{fsm}': failed externally: {source}")]
    External {
        /// Name of the state machine.
        fsm: String,
        /// The reported error.
        #[source]
        source: anyhow::Error,
    },

    /// `shutdown()` was called before the machine reached a terminal state.
    #[error("fsm '{fsm}': shutdown requested while not terminated")]
    NotTerminated {
        /// Name of the state machine.
        fsm: String,
    },
}

impl FsmError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            FsmError::MissingInitial { .. } => "fsm_missing_initial",
            FsmError::MissingTerminal { .. } => "fsm_missing_terminal",
            FsmError::EmptyTargets { .. } => "fsm_empty_targets",
            FsmError::UnresolvedTarget { .. } => "fsm_unresolved_target",
            FsmError::IllegalTarget { .. } => "fsm_illegal_target",
            FsmError::ActionFailed { .. } => "fsm_action_failed",
            FsmError::External { .. } => "fsm_external_failure",
            FsmError::NotTerminated { .. } => "fsm_not_terminated",
        }
    }
}

/// # Errors produced by a distributed store or channel backend.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    #[error("store '{name}' unavailable: {reason}")]
    Unavailable {
        /// Map or channel name.
        name: String,
        /// Backend specific reason.
        reason: String,
    },

    /// A value could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Unavailable { .. } => "store_unavailable",
            StoreError::Serialization(_) => "store_serialization",
        }
    }
}

/// # Errors produced by the topology service.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TopologyError {
    /// The query is only valid once the node holds a topology.
    #[error("topology not available in state {state}")]
    NotReady {
        /// Current topology state (debug rendering).
        state: String,
    },

    /// The topology type stored in the cluster has no registered processor.
    #[error("no topology processor named '{0}'")]
    UnknownProcessor(String),

    /// No topology processor was registered at all.
    #[error("no topology processors registered")]
    NoProcessors,

    /// Reading or writing the shared store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TopologyError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TopologyError::NotReady { .. } => "topology_not_ready",
            TopologyError::UnknownProcessor(_) => "topology_unknown_processor",
            TopologyError::NoProcessors => "topology_no_processors",
            TopologyError::Store(_) => "topology_store",
        }
    }
}

/// # Errors produced while building or driving a computation task.
///
/// These are recoverable at the worker level: the computation goes to `FAILED`
/// and can be cleaned and configured again.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SetupError {
    /// The configuration names a plugin key that was never registered.
    #[error("unknown task plugin '{0}'")]
    UnknownPlugin(String),

    /// The configuration document could not be interpreted.
    #[error("invalid configuration document: {0}")]
    InvalidDocument(String),

    /// A dependency requested by a task factory is missing or has the wrong type.
    #[error("dependency '{0}' is not registered")]
    MissingDependency(String),

    /// A dependency was registered after the registry was sealed.
    #[error("dependency registry is sealed; cannot register '{0}'")]
    RegistrySealed(String),

    /// The plugin factory rejected the configuration.
    #[error("task factory failed: {0}")]
    Factory(String),

    /// A lifecycle call was made while no task is active.
    #[error("no active task")]
    NoActiveTask,

    /// A task was started twice in the same context.
    #[error("task already started")]
    AlreadyStarted,

    /// `clean_up` was called while the task is still running.
    #[error("task '{0}' is still running")]
    StillRunning(String),

    /// No configuration was found in the shared store.
    #[error("no computation configuration available")]
    MissingConfiguration,
}

impl SetupError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SetupError::UnknownPlugin(_) => "setup_unknown_plugin",
            SetupError::InvalidDocument(_) => "setup_invalid_document",
            SetupError::MissingDependency(_) => "setup_missing_dependency",
            SetupError::RegistrySealed(_) => "setup_registry_sealed",
            SetupError::Factory(_) => "setup_factory",
            SetupError::NoActiveTask => "setup_no_active_task",
            SetupError::AlreadyStarted => "setup_already_started",
            SetupError::StillRunning(_) => "setup_still_running",
            SetupError::MissingConfiguration => "setup_missing_configuration",
        }
    }
}

/// # Errors produced by task execution.
///
/// `Canceled` is the cooperative-interruption outcome and is never reported as a failure.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// Non-recoverable error raised by the task body.
    #[error("fatal error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Task execution failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The task body panicked.
    #[error("task panicked: {info}")]
    Panicked {
        /// Panic payload rendering.
        info: String,
    },

    /// Task observed its cancellation token and stopped.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use clustervisor::TaskError;
    ///
    /// let err = TaskError::Fail { error: "boom".into() };
    /// assert_eq!(err.as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fatal { .. } => "task_fatal",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::Canceled => "task_canceled",
        }
    }

    /// True for the cooperative cancellation outcome.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}

/// # Errors produced by the worker service.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The node never became ready (lifecycle up and topology present).
    #[error("node not ready after {attempts} attempts")]
    NotReady {
        /// Number of polls performed.
        attempts: u32,
    },

    /// The readiness wait was interrupted by shutdown.
    #[error("interrupted while waiting for readiness")]
    Interrupted,

    /// Task setup failed.
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// Reading or writing the shared store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A topology query failed (usually: no topology yet).
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// A unicast address was never advertised by a neighbour.
    #[error("unknown worker address '{0}'")]
    UnknownAddress(String),

    /// The worker state machine could not be built.
    #[error(transparent)]
    Fsm(#[from] FsmError),
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::NotReady { .. } => "worker_not_ready",
            WorkerError::Interrupted => "worker_interrupted",
            WorkerError::Setup(e) => e.as_label(),
            WorkerError::Store(e) => e.as_label(),
            WorkerError::Topology(e) => e.as_label(),
            WorkerError::UnknownAddress(_) => "worker_unknown_address",
            WorkerError::Fsm(e) => e.as_label(),
        }
    }
}

/// # Errors produced by the node runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some services did not terminate in time.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of the services that did not stop in time.
        stuck: Vec<String>,
    },

    /// A service state machine could not be built or stopped.
    #[error(transparent)]
    Fsm(#[from] FsmError),

    /// Wiring a service to the backend failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The worker service could not be built.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Waiting for OS signals failed.
    #[error("signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use clustervisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Fsm(e) => e.as_label(),
            RuntimeError::Store(e) => e.as_label(),
            RuntimeError::Worker(e) => e.as_label(),
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

/// Renders a `catch_unwind` payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_rendered() {
        let payload = std::panic::catch_unwind::<_, ()>(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload = std::panic::catch_unwind::<_, ()>(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "code 7");

        let payload = std::panic::catch_unwind::<_, ()>(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
