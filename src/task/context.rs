//! # Task execution wrapper.
//!
//! [`ComputationContext`] owns one configured computation on one node:
//!
//! ```text
//!   new(configuration, plugins, dependencies)      (CONFIGURE)
//!     └─ start(on_done) ─► seal registry ─► factory ─► tokio::spawn(run)   (START)
//!          pause / resume / cancel                 (PAUSE, RESUME, CANCEL)
//!          run completes ─► on_done(TaskOutcome)
//!     └─ clean_up(grace) ─► wait or abort ─► destroy registry             (CLEAN)
//! ```
//!
//! ## Locks
//! Lifecycle calls take the `started` write lock; status queries take the read lock.
//! The lock is never held across `.await`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Dependencies, PluginRegistry, TaskRef, TaskSetup, WorkerConfiguration, dependencies};
use crate::error::{SetupError, TaskError, panic_message};
use crate::events::{Bus, Event, EventKind};

/// How a started task ended.
#[derive(Clone, Debug)]
pub enum TaskOutcome {
    Finished,
    Failed(TaskError),
    /// Stopped after cancellation; never reported as a failure.
    Cancelled,
}

struct StartedTask {
    task: TaskRef,
    token: CancellationToken,
    finished: CancellationToken,
    handle: JoinHandle<()>,
    paused: AtomicBool,
    cancelled_at: Option<Instant>,
}

/// One computation's dependencies and running task.
pub struct ComputationContext {
    configuration: WorkerConfiguration,
    plugins: Arc<PluginRegistry>,
    dependencies: Arc<Dependencies>,
    bus: Bus,
    node: Arc<str>,
    started: RwLock<Option<StartedTask>>,
}

impl ComputationContext {
    pub fn new(
        configuration: WorkerConfiguration,
        plugins: Arc<PluginRegistry>,
        dependencies: Dependencies,
        bus: Bus,
        node: &str,
    ) -> Self {
        Self {
            configuration,
            plugins,
            dependencies: Arc::new(dependencies),
            bus,
            node: Arc::from(node),
            started: RwLock::new(None),
        }
    }

    pub fn configuration(&self) -> &WorkerConfiguration {
        &self.configuration
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    /// Builds the task and spawns it; `on_done` runs once when it ends.
    ///
    /// # Errors
    /// Any [`SetupError`] from document resolution, plugin lookup or the factory;
    /// [`SetupError::AlreadyStarted`] on a second call.
    pub fn start<F>(&self, on_done: F) -> Result<(), SetupError>
    where
        F: FnOnce(TaskOutcome) + Send + 'static,
    {
        let mut started = self.started.write();
        if started.is_some() {
            return Err(SetupError::AlreadyStarted);
        }

        let document = self.configuration.resolve_document()?;
        let key = self.configuration.plugin_key(document.as_ref())?;
        if let Some(doc) = &document {
            self.dependencies
                .register(dependencies::names::DOCUMENT, Arc::new(doc.clone()))?;
        }
        self.dependencies.finish_configuration();

        let task = self.plugins.build(&TaskSetup {
            key: &key,
            dependencies: &self.dependencies,
            document: document.as_ref(),
            libraries: self.configuration.libraries(),
        })?;

        let token = CancellationToken::new();
        let finished = CancellationToken::new();
        let handle = tokio::spawn(run_task(
            Arc::clone(&task),
            token.clone(),
            finished.clone(),
            self.bus.clone(),
            Arc::clone(&self.node),
            on_done,
        ));

        tracing::info!(node = %self.node, task = task.name(), plugin = %key, "task scheduled");
        self.bus.publish(
            Event::new(EventKind::TaskStarted)
                .with_node(Arc::clone(&self.node))
                .with_task(task.name()),
        );
        *started = Some(StartedTask {
            task,
            token,
            finished,
            handle,
            paused: AtomicBool::new(false),
            cancelled_at: None,
        });
        Ok(())
    }

    /// Started and not yet ended.
    pub fn is_running(&self) -> bool {
        self.started
            .read()
            .as_ref()
            .is_some_and(|s| !s.finished.is_cancelled())
    }

    pub fn is_paused(&self) -> bool {
        self.started
            .read()
            .as_ref()
            .is_some_and(|s| s.paused.load(Ordering::Acquire))
    }

    pub fn task_name(&self) -> Option<String> {
        self.started.read().as_ref().map(|s| s.task.name().to_string())
    }

    /// Suspends a pauseable task. Returns `false` if the task cannot pause.
    pub fn pause(&self) -> Result<bool, SetupError> {
        self.toggle_pause(true)
    }

    /// Resumes a paused task. Returns `false` if the task cannot pause.
    pub fn resume(&self) -> Result<bool, SetupError> {
        self.toggle_pause(false)
    }

    fn toggle_pause(&self, pause: bool) -> Result<bool, SetupError> {
        let started = self.started.read();
        let s = started.as_ref().ok_or(SetupError::NoActiveTask)?;
        let Some(p) = s.task.as_pauseable() else {
            tracing::info!(node = %self.node, task = s.task.name(), "task is not pauseable; ignored");
            return Ok(false);
        };
        if pause {
            p.pause();
        } else {
            p.resume();
        }
        s.paused.store(pause, Ordering::Release);
        Ok(true)
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&self) -> Result<(), SetupError> {
        let mut started = self.started.write();
        let s = started.as_mut().ok_or(SetupError::NoActiveTask)?;
        if s.cancelled_at.is_none() {
            s.cancelled_at = Some(Instant::now());
        }
        // A paused task must be able to observe the token.
        if s.paused.swap(false, Ordering::AcqRel) {
            if let Some(p) = s.task.as_pauseable() {
                p.resume();
            }
        }
        s.token.cancel();
        tracing::debug!(node = %self.node, task = s.task.name(), "task cancellation requested");
        Ok(())
    }

    /// Releases the task and destroys the dependency registry.
    ///
    /// A cancelled task still running is awaited until `grace` has elapsed since
    /// cancellation (`None` waits without bound), then aborted.
    ///
    /// # Errors
    /// [`SetupError::StillRunning`] if the task is running and was never cancelled.
    pub async fn clean_up(&self, grace: Option<Duration>) -> Result<(), SetupError> {
        let pending = {
            let started = self.started.read();
            match started.as_ref() {
                Some(s) if !s.finished.is_cancelled() => match s.cancelled_at {
                    None => return Err(SetupError::StillRunning(s.task.name().to_string())),
                    Some(at) => Some((s.finished.clone(), at)),
                },
                _ => None,
            }
        };

        if let Some((finished, cancelled_at)) = pending {
            let completed = match grace {
                None => {
                    finished.cancelled().await;
                    true
                }
                Some(grace) => {
                    let left = grace.saturating_sub(cancelled_at.elapsed());
                    tokio::time::timeout(left, finished.cancelled()).await.is_ok()
                }
            };
            if !completed {
                if let Some(s) = self.started.read().as_ref() {
                    tracing::warn!(node = %self.node, task = s.task.name(), "task ignored cancellation; aborting");
                    s.handle.abort();
                }
            }
        }

        if let Some(s) = self.started.write().take() {
            tracing::debug!(node = %self.node, task = s.task.name(), "task released");
        }
        self.dependencies.destroy();
        Ok(())
    }

    /// Cancels and aborts without waiting; used when the owner goes away.
    pub(crate) fn abort(&self) {
        if let Some(s) = self.started.write().take() {
            s.token.cancel();
            s.handle.abort();
        }
        self.dependencies.destroy();
    }
}

async fn run_task<F>(
    task: TaskRef,
    token: CancellationToken,
    finished: CancellationToken,
    bus: Bus,
    node: Arc<str>,
    on_done: F,
) where
    F: FnOnce(TaskOutcome) + Send + 'static,
{
    let res = AssertUnwindSafe(task.run(token.clone())).catch_unwind().await;
    let outcome = match res {
        Ok(Ok(())) if token.is_cancelled() => TaskOutcome::Cancelled,
        Ok(Ok(())) => TaskOutcome::Finished,
        Ok(Err(e)) if e.is_cancellation() || token.is_cancelled() => TaskOutcome::Cancelled,
        Ok(Err(e)) => TaskOutcome::Failed(e),
        Err(panic) => TaskOutcome::Failed(TaskError::Panicked {
            info: panic_message(panic.as_ref()),
        }),
    };

    let event = match &outcome {
        TaskOutcome::Finished => {
            tracing::info!(node = %node, task = task.name(), "task finished");
            Event::new(EventKind::TaskFinished)
        }
        TaskOutcome::Cancelled => {
            tracing::info!(node = %node, task = task.name(), "task cancelled");
            Event::new(EventKind::TaskCancelled)
        }
        TaskOutcome::Failed(e) => {
            tracing::warn!(node = %node, task = task.name(), error = %e, label = e.as_label(), "task failed");
            Event::new(EventKind::TaskFailed).with_reason(e.to_string())
        }
    };
    bus.publish(event.with_node(node).with_task(task.name()));

    finished.cancel();
    on_done(outcome);
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ComputeTask, PauseGate, Pauseable, TaskFn};
    use async_trait::async_trait;
    use tokio::sync::oneshot;

    fn context(plugins: PluginRegistry, cfg: WorkerConfiguration) -> ComputationContext {
        ComputationContext::new(cfg, Arc::new(plugins), Dependencies::new(), Bus::new(16), "n1")
    }

    fn reporter() -> (impl FnOnce(TaskOutcome) + Send + 'static, oneshot::Receiver<TaskOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            move |o| {
                let _ = tx.send(o);
            },
            rx,
        )
    }

    #[tokio::test]
    async fn finished_task_reports_and_cleans() {
        let plugins = PluginRegistry::new().with("ok", |_| {
            Ok(TaskFn::arc("ok", |_ctx: CancellationToken| async { Ok(()) }))
        });
        let ctx = context(plugins, WorkerConfiguration::plugin("ok"));
        let (done, rx) = reporter();
        ctx.start(done).unwrap();

        assert!(matches!(rx.await.unwrap(), TaskOutcome::Finished));
        assert!(!ctx.is_running());
        ctx.clean_up(None).await.unwrap();
        assert!(ctx.task_name().is_none());
        assert!(ctx.dependencies().is_empty());
    }

    #[tokio::test]
    async fn unknown_plugin_is_a_setup_error() {
        let ctx = context(PluginRegistry::new(), WorkerConfiguration::plugin("nope"));
        let err = ctx.start(|_| {}).unwrap_err();
        assert_eq!(err.as_label(), "setup_unknown_plugin");
        assert!(!ctx.is_running());
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let plugins = PluginRegistry::new().with("bad", |_| {
            Ok(TaskFn::arc("bad", |_ctx: CancellationToken| async {
                if true {
                    panic!("kaboom");
                }
                Ok(())
            }))
        });
        let ctx = context(plugins, WorkerConfiguration::plugin("bad"));
        let (done, rx) = reporter();
        ctx.start(done).unwrap();

        match rx.await.unwrap() {
            TaskOutcome::Failed(TaskError::Panicked { info }) => assert_eq!(info, "kaboom"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_is_not_a_failure() {
        let plugins = PluginRegistry::new().with("loop", |_| {
            Ok(TaskFn::arc("loop", |ctx: CancellationToken| async move {
                ctx.cancelled().await;
                Err(TaskError::Fail {
                    error: "interrupted".into(),
                })
            }))
        });
        let ctx = context(plugins, WorkerConfiguration::plugin("loop"));
        let (done, rx) = reporter();
        ctx.start(done).unwrap();
        assert!(ctx.is_running());
        assert!(ctx.clean_up(None).await.is_err());

        ctx.cancel().unwrap();
        assert!(matches!(rx.await.unwrap(), TaskOutcome::Cancelled));
        ctx.clean_up(Some(Duration::from_secs(1))).await.unwrap();
    }

    #[tokio::test]
    async fn stubborn_task_is_aborted_after_grace() {
        let plugins = PluginRegistry::new().with("stubborn", |_| {
            Ok(TaskFn::arc("stubborn", |_ctx: CancellationToken| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }))
        });
        let ctx = context(plugins, WorkerConfiguration::plugin("stubborn"));
        ctx.start(|_| {}).unwrap();
        ctx.cancel().unwrap();

        tokio::time::timeout(
            Duration::from_secs(2),
            ctx.clean_up(Some(Duration::from_millis(50))),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(ctx.task_name().is_none());
    }

    struct Pausing {
        gate: PauseGate,
    }

    #[async_trait]
    impl ComputeTask for Pausing {
        fn name(&self) -> &str {
            "pausing"
        }

        async fn run(&self, ctx: CancellationToken) -> Result<(), TaskError> {
            loop {
                self.gate.wait_while_paused().await;
                if ctx.is_cancelled() {
                    return Err(TaskError::Canceled);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }

        fn as_pauseable(&self) -> Option<&dyn Pauseable> {
            Some(&self.gate)
        }
    }

    #[tokio::test]
    async fn pause_requires_capability() {
        let plugins = PluginRegistry::new()
            .with("pausing", |_| Ok(Arc::new(Pausing { gate: PauseGate::new() })))
            .with("plain", |_| {
                Ok(TaskFn::arc("plain", |ctx: CancellationToken| async move {
                    ctx.cancelled().await;
                    Ok(())
                }))
            });

        let plain = context(plugins.clone(), WorkerConfiguration::plugin("plain"));
        plain.start(|_| {}).unwrap();
        assert!(!plain.pause().unwrap());
        assert!(!plain.is_paused());
        plain.cancel().unwrap();

        let pausing = context(plugins, WorkerConfiguration::plugin("pausing"));
        let (done, rx) = reporter();
        pausing.start(done).unwrap();
        assert!(pausing.pause().unwrap());
        assert!(pausing.is_paused());

        // Cancelling a paused task releases it.
        pausing.cancel().unwrap();
        assert!(matches!(rx.await.unwrap(), TaskOutcome::Cancelled));
    }

    #[tokio::test]
    async fn document_is_registered_before_sealing() {
        let plugins = PluginRegistry::new().with("doc", |setup| {
            let rounds = setup
                .dependencies
                .get::<serde_json::Value>(dependencies::names::DOCUMENT)?["rounds"]
                .as_u64()
                .unwrap_or_default();
            assert_eq!(rounds, 2);
            Ok(TaskFn::arc("doc", |_ctx: CancellationToken| async { Ok(()) }))
        });
        let cfg = WorkerConfiguration::document(r#"{"task": "doc", "rounds": 2}"#, Default::default());
        let ctx = context(plugins, cfg);
        let (done, rx) = reporter();
        ctx.start(done).unwrap();
        assert!(matches!(rx.await.unwrap(), TaskOutcome::Finished));
        assert!(ctx.dependencies().is_sealed());
    }
}
