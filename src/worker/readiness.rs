//! Readiness gate: lifecycle up and topology present.

use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::node::{Config, LifecycleService};
use crate::topology::TopologyService;

/// True once the node can take part in a computation.
pub fn is_ready(lifecycle: &LifecycleService, topology: &TopologyService) -> bool {
    lifecycle.is_running() && topology.has_topology()
}

/// Polls [`is_ready`] with the configured backoff.
///
/// # Errors
/// - [`WorkerError::Interrupted`] when `token` is cancelled
/// - [`WorkerError::NotReady`] after `readiness_attempts` polls
pub async fn wait_ready(
    lifecycle: &LifecycleService,
    topology: &TopologyService,
    cfg: &Config,
    token: &CancellationToken,
) -> Result<(), WorkerError> {
    let mut attempt: u32 = 0;
    loop {
        if token.is_cancelled() {
            return Err(WorkerError::Interrupted);
        }
        if is_ready(lifecycle, topology) {
            return Ok(());
        }
        if cfg.readiness_limit().is_some_and(|limit| attempt + 1 >= limit) {
            return Err(WorkerError::NotReady {
                attempts: attempt + 1,
            });
        }
        let delay = cfg.readiness.next(attempt);
        tracing::debug!(node = %topology.node(), attempt, ?delay, "node not ready yet");
        tokio::select! {
            _ = token.cancelled() => return Err(WorkerError::Interrupted),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt = attempt.saturating_add(1);
    }
}
