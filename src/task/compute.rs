//! # Computation task abstraction.
//!
//! A [`ComputeTask`] is the user-supplied unit run by a node while the computation is
//! `EXECUTING`. It receives a [`CancellationToken`] and must observe it to stop
//! cooperatively on `CANCEL_COMPUTATION` or node shutdown.
//!
//! Tasks that can be suspended expose a [`Pauseable`] view through
//! [`ComputeTask::as_pauseable`]; [`PauseGate`] is a ready-made implementation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Shared handle to a task.
pub type TaskRef = Arc<dyn ComputeTask>;

/// # Asynchronous, cancelable computation.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use async_trait::async_trait;
/// use clustervisor::{ComputeTask, TaskError};
///
/// struct Sum;
///
/// #[async_trait]
/// impl ComputeTask for Sum {
///     fn name(&self) -> &str { "sum" }
///
///     async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
///         for _ in 0..10 {
///             if ctx.is_cancelled() {
///                 return Err(TaskError::Canceled);
///             }
///             tokio::task::yield_now().await;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ComputeTask: Send + Sync + 'static {
    /// Stable, human-readable task name.
    fn name(&self) -> &str;

    /// Runs the computation until completion, failure or cancellation.
    async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError>;

    /// Pause capability; `None` makes pause and resume no-ops.
    fn as_pauseable(&self) -> Option<&dyn Pauseable> {
        None
    }
}

/// Suspend/resume capability of a task.
pub trait Pauseable: Send + Sync {
    fn pause(&self);
    fn resume(&self);
}

/// Pause flag a task body can wait on.
///
/// ```
/// use clustervisor::task::{PauseGate, Pauseable};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let gate = PauseGate::new();
/// gate.pause();
/// assert!(gate.is_paused());
/// gate.resume();
/// gate.wait_while_paused().await;
/// # }
/// ```
#[derive(Debug)]
pub struct PauseGate {
    tx: watch::Sender<bool>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(false),
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns once the gate is open.
    pub async fn wait_while_paused(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl Pauseable for PauseGate {
    fn pause(&self) {
        self.tx.send_replace(true);
    }

    fn resume(&self) {
        self.tx.send_replace(false);
    }
}
