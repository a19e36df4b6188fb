//! # Computation service.
//!
//! Per-node state machine driving one computation through its lifecycle and
//! mirroring progress into the store: this node's state in `worker/state`, and
//! (master only) the global state and error in `worker/configuration`.
//!
//! ```text
//!  STOPPED ─CONFIGURE─► CONFIGURED ─START─► EXECUTING ◄─RESUME─ PAUSED
//!     ▲                   │   └──(setup error)──► FAILED   │ ─PAUSE─►
//!     │                   │                                │
//!     │         EXECUTING/PAUSED ─FINISHED_SUCCESSFULLY─► FINISHED
//!     │         EXECUTING/PAUSED ─FAILED──────────────► FAILED
//!     │         EXECUTING/PAUSED ─CANCEL──────────────► CANCELLED
//!     └──CLEAN── CONFIGURED | FINISHED | FAILED | CANCELLED
//!  (any) ─TERMINATE─► TERMINATED
//! ```
//!
//! `START` waits behind the readiness gate (lifecycle up and topology present).
//! A node attaching while the cluster is already `CONFIGURED` or `RUNNING` drives
//! itself through `CONFIGURE` (and `START`) to join the computation.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::readiness::wait_ready;
use super::{CommunicationFacility, ComputationFailure, ComputationState, keys};
use crate::error::{SetupError, StoreError, TaskError, WorkerError};
use crate::events::Bus;
use crate::fsm::{EventSender, StateMachine, Transit, action};
use crate::node::{Config, LifecycleService, NodeId};
use crate::store::{Cluster, DistributedMap, MapEvent, MapExt, SubscriptionId, names};
use crate::task::{
    ComputationContext, Dependencies, PluginRegistry, TaskOutcome, WorkerConfiguration,
    dependencies,
};
use crate::topology::TopologyService;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Stopped,
    Configured,
    Executing,
    Paused,
    Finished,
    Cancelled,
    Failed,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComputationEvent {
    Configure,
    Start,
    Pause,
    Resume,
    Cancel,
    Clean,
    FinishedSuccessfully,
    Failed,
    Terminate,
}

type Tr = Transit<WorkerState, ComputationEvent>;

/// Collaborators of a [`ComputationService`].
pub struct ComputationDeps {
    pub cluster: Arc<dyn Cluster>,
    pub topology: Arc<TopologyService>,
    pub lifecycle: Arc<LifecycleService>,
    pub plugins: Arc<PluginRegistry>,
    pub facilities: Vec<Arc<dyn CommunicationFacility>>,
}

struct Inner {
    node: NodeId,
    cfg: Config,
    bus: Bus,
    deps: ComputationDeps,
    configuration: Arc<dyn DistributedMap>,
    node_states: Arc<dyn DistributedMap>,
    context: Mutex<Option<Arc<ComputationContext>>>,
    task_error: Arc<Mutex<Option<TaskError>>>,
    finish_watches: Mutex<Vec<SubscriptionId>>,
    interrupt: CancellationToken,
    events: EventSender<ComputationEvent>,
}

pub struct ComputationService {
    inner: Arc<Inner>,
    fsm: StateMachine<WorkerState, ComputationEvent>,
}

macro_rules! step {
    ($inner:expr, |$i:ident, $t:ident| $body:expr) => {{
        let inner = Arc::clone(&$inner);
        action(move |$t: Tr| {
            let $i = Arc::clone(&inner);
            async move { $body }
        })
    }};
}

impl ComputationService {
    pub fn new(
        node: NodeId,
        deps: ComputationDeps,
        bus: Bus,
        cfg: &Config,
    ) -> Result<Self, WorkerError> {
        use ComputationEvent as Ev;
        use WorkerState as St;

        let builder = StateMachine::builder("compute");
        let inner = Arc::new(Inner {
            configuration: deps.cluster.map(names::WORKER_CONFIGURATION),
            node_states: deps.cluster.map(names::WORKER_STATE),
            node,
            cfg: cfg.clone(),
            bus: bus.clone(),
            deps,
            context: Mutex::new(None),
            task_error: Arc::new(Mutex::new(None)),
            finish_watches: Mutex::new(Vec::new()),
            interrupt: CancellationToken::new(),
            events: builder.sender(),
        });

        let clean = || step!(inner, |i, _t| i.clean().await);
        let cancel = || step!(inner, |i, _t| i.with_context(|c| c.cancel()));
        let finished = || step!(inner, |i, _t| i.task_finished());
        let failed = || step!(inner, |i, _t| i.task_failed());
        let node = inner.node.clone();

        let fsm = builder
            .initial(St::Stopped)
            .terminal([St::Terminated])
            .transition_with(
                St::Stopped,
                Ev::Configure,
                [St::Configured, St::Stopped],
                step!(inner, |i, t| i.configure(&t)),
            )
            .transition_with(
                St::Configured,
                Ev::Start,
                [St::Executing, St::Failed],
                step!(inner, |i, t| i.start(&t).await),
            )
            .transition_with(St::Configured, Ev::Clean, [St::Stopped], clean())
            .transition_with(
                St::Executing,
                Ev::Pause,
                [St::Paused],
                step!(inner, |i, _t| i.with_context(|c| c.pause().map(drop))),
            )
            .transition_with(St::Executing, Ev::Cancel, [St::Cancelled], cancel())
            .transition_with(St::Executing, Ev::FinishedSuccessfully, [St::Finished], finished())
            .transition_with(St::Executing, Ev::Failed, [St::Failed], failed())
            .transition_with(
                St::Paused,
                Ev::Resume,
                [St::Executing],
                step!(inner, |i, _t| i.with_context(|c| c.resume().map(drop))),
            )
            .transition_with(St::Paused, Ev::Cancel, [St::Cancelled], cancel())
            .transition_with(St::Paused, Ev::FinishedSuccessfully, [St::Finished], finished())
            .transition_with(St::Paused, Ev::Failed, [St::Failed], failed())
            .transition_with(St::Finished, Ev::Clean, [St::Stopped], clean())
            .transition_with(St::Failed, Ev::Clean, [St::Stopped], clean())
            .transition_with(St::Cancelled, Ev::Clean, [St::Stopped], clean())
            .any_state_with(
                Ev::Terminate,
                [St::Terminated],
                step!(inner, |i, _t| i.terminate().await),
            )
            .on_failure(move |e| {
                tracing::error!(node = %node, error = %e, label = e.as_label(), "computation state machine failed")
            })
            .notify(bus)
            .with_tick(cfg.tick)
            .with_poll(cfg.termination_poll)
            .build()?;

        inner.set_local(ComputationState::None)?;
        Ok(Self { inner, fsm })
    }

    /// Joins a computation already configured or running in the cluster.
    pub(crate) fn catch_up(&self) -> Result<(), StoreError> {
        match self.inner.global_state()? {
            ComputationState::Configured => {
                tracing::info!(node = %self.inner.node, "joining configured computation");
                self.fsm.fire(ComputationEvent::Configure);
            }
            ComputationState::Running => {
                tracing::info!(node = %self.inner.node, "joining running computation");
                self.fsm.fire(ComputationEvent::Configure);
                self.fsm.fire(ComputationEvent::Start);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn fire(&self, event: ComputationEvent) {
        self.fsm.fire(event);
    }

    pub(crate) fn sender(&self) -> EventSender<ComputationEvent> {
        self.inner.events.clone()
    }

    pub fn state(&self) -> WorkerState {
        self.fsm.current_state()
    }

    /// This node's state as stored in `worker/state`.
    pub fn local_state(&self) -> Result<ComputationState, StoreError> {
        self.inner.local_state()
    }

    pub fn global_state(&self) -> Result<ComputationState, StoreError> {
        self.inner.global_state()
    }

    /// True while a task is scheduled and has not ended.
    pub fn is_task_running(&self) -> bool {
        self.inner
            .context
            .lock()
            .as_ref()
            .is_some_and(|c| c.is_running())
    }

    pub fn context(&self) -> Option<Arc<ComputationContext>> {
        self.inner.context.lock().clone()
    }

    /// Interrupts a pending readiness wait and fires `TERMINATE`.
    pub fn terminate(&self) {
        self.inner.interrupt.cancel();
        self.fsm.fire(ComputationEvent::Terminate);
    }

    pub fn is_terminated(&self) -> bool {
        self.fsm.is_terminated()
    }

    pub async fn await_termination(&self) {
        self.fsm.await_termination().await;
    }

    /// Aborts whatever task is left; used after a failed or timed-out stop.
    pub(crate) fn release(&self) {
        if let Some(ctx) = self.inner.context.lock().take() {
            ctx.abort();
        }
    }

    pub(crate) fn machine(&self) -> &StateMachine<WorkerState, ComputationEvent> {
        &self.fsm
    }
}

impl Inner {
    fn is_master(&self) -> anyhow::Result<bool> {
        Ok(self.deps.topology.is_local_node_master()?)
    }

    fn local_state(&self) -> Result<ComputationState, StoreError> {
        Ok(self
            .node_states
            .get_as(self.node.as_str())?
            .unwrap_or_default())
    }

    fn global_state(&self) -> Result<ComputationState, StoreError> {
        Ok(self
            .configuration
            .get_as(keys::COMPUTATION_STATE)?
            .unwrap_or_default())
    }

    fn set_local(&self, state: ComputationState) -> Result<(), StoreError> {
        tracing::debug!(node = %self.node, ?state, "local computation state");
        self.node_states.put_as(self.node.as_str(), &state)
    }

    fn set_global_if_master(&self, state: ComputationState) -> anyhow::Result<()> {
        if self.is_master()? {
            tracing::info!(node = %self.node, ?state, "global computation state");
            self.configuration.put_as(keys::COMPUTATION_STATE, &state)?;
        }
        Ok(())
    }

    fn record_failure_if_master(&self, kind: &str, message: String) -> anyhow::Result<()> {
        self.set_global_if_master(ComputationState::Failed)?;
        if self.is_master()? {
            self.configuration.put_as(
                keys::ERROR,
                &ComputationFailure {
                    kind: kind.to_string(),
                    message,
                    node: self.node.clone(),
                },
            )?;
        }
        Ok(())
    }

    fn with_context(
        &self,
        f: impl FnOnce(&ComputationContext) -> Result<(), SetupError>,
    ) -> anyhow::Result<()> {
        let ctx = self.context.lock().clone().ok_or(SetupError::NoActiveTask)?;
        f(&ctx)?;
        Ok(())
    }

    fn configure(&self, t: &Tr) -> anyhow::Result<()> {
        let Some(configuration) = self
            .configuration
            .get_as::<WorkerConfiguration>(keys::CONFIGURATION)?
        else {
            tracing::warn!(node = %self.node, "no configuration to load; staying stopped");
            t.go_to(WorkerState::Stopped)?;
            return Ok(());
        };

        let deps = Dependencies::new();
        deps.register(dependencies::names::NODE_ID, Arc::new(self.node.clone()))?;
        deps.register(dependencies::names::CLUSTER, Arc::new(Arc::clone(&self.deps.cluster)))?;
        deps.register(dependencies::names::RUNTIME, Arc::new(Handle::current()))?;
        for facility in &self.deps.facilities {
            Arc::clone(facility).provide(&deps)?;
        }

        *self.context.lock() = Some(Arc::new(ComputationContext::new(
            configuration,
            Arc::clone(&self.deps.plugins),
            deps,
            self.bus.clone(),
            self.node.as_str(),
        )));
        self.set_local(ComputationState::Configured)?;
        self.set_global_if_master(ComputationState::Configured)?;
        t.go_to(WorkerState::Configured)?;
        tracing::info!(node = %self.node, "computation configured");
        Ok(())
    }

    async fn start(&self, t: &Tr) -> anyhow::Result<()> {
        wait_ready(
            &self.deps.lifecycle,
            &self.deps.topology,
            &self.cfg,
            &self.interrupt,
        )
        .await?;
        let ctx = self.context.lock().clone().ok_or(SetupError::NoActiveTask)?;

        let events = self.events.clone();
        let slot = Arc::clone(&self.task_error);
        let started = ctx.start(move |outcome| match outcome {
            TaskOutcome::Finished => events.fire(ComputationEvent::FinishedSuccessfully),
            TaskOutcome::Failed(e) => {
                *slot.lock() = Some(e);
                events.fire(ComputationEvent::Failed);
            }
            TaskOutcome::Cancelled => {}
        });

        match started {
            Ok(()) => {
                self.set_local(ComputationState::Running)?;
                self.set_global_if_master(ComputationState::Running)?;
                t.go_to(WorkerState::Executing)?;
            }
            Err(e) => {
                tracing::warn!(node = %self.node, error = %e, label = e.as_label(), "task setup failed");
                self.set_local(ComputationState::Failed)?;
                self.record_failure_if_master(e.as_label(), e.to_string())?;
                t.go_to(WorkerState::Failed)?;
            }
        }
        Ok(())
    }

    fn task_finished(self: &Arc<Self>) -> anyhow::Result<()> {
        self.set_local(ComputationState::Finished)?;
        if self.is_master()? && !self.check_all_finished()? {
            self.watch_stragglers()?;
        }
        Ok(())
    }

    /// Writes global `FINISHED` once every node reports it.
    fn check_all_finished(&self) -> Result<bool, StoreError> {
        let pending = self.pending_nodes()?;
        if !pending.is_empty() {
            tracing::debug!(node = %self.node, pending = ?pending, "waiting for nodes to finish");
            return Ok(false);
        }
        tracing::info!(node = %self.node, "every node finished");
        self.configuration
            .put_as(keys::COMPUTATION_STATE, &ComputationState::Finished)?;
        self.drop_finish_watches();
        Ok(true)
    }

    fn pending_nodes(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .node_states
            .values_as::<ComputationState>()?
            .into_iter()
            .filter(|(_, s)| *s != ComputationState::Finished)
            .map(|(k, _)| k)
            .collect())
    }

    /// Re-checks completion whenever an unfinished node's entry changes.
    fn watch_stragglers(self: &Arc<Self>) -> Result<(), StoreError> {
        self.drop_finish_watches();
        let mut ids = Vec::new();
        for key in self.pending_nodes()? {
            let weak: Weak<Inner> = Arc::downgrade(self);
            let id = self.node_states.watch(
                &key,
                Arc::new(move |_e: &MapEvent| {
                    if let Some(inner) = weak.upgrade() {
                        if let Err(e) = inner.check_all_finished() {
                            tracing::warn!(node = %inner.node, error = %e, "completion check failed");
                        }
                    }
                }),
            )?;
            ids.push(id);
        }
        *self.finish_watches.lock() = ids;
        // A node may have finished between the first check and the watch.
        self.check_all_finished()?;
        Ok(())
    }

    fn drop_finish_watches(&self) {
        for id in self.finish_watches.lock().drain(..) {
            self.node_states.unwatch(id);
        }
    }

    fn task_failed(&self) -> anyhow::Result<()> {
        let error = self.task_error.lock().take();
        self.set_local(ComputationState::Failed)?;
        let (kind, message) = match &error {
            Some(e) => (e.as_label(), e.to_string()),
            None => ("task_failed", "task failed".to_string()),
        };
        self.record_failure_if_master(kind, message)?;
        Ok(())
    }

    async fn clean(&self) -> anyhow::Result<()> {
        self.drop_finish_watches();
        let ctx = self.context.lock().take();
        if let Some(ctx) = ctx {
            ctx.clean_up(self.cfg.cancel_grace_limit()).await?;
        }
        for facility in &self.deps.facilities {
            facility.reset();
        }
        self.task_error.lock().take();
        self.set_local(ComputationState::None)?;
        if self.is_master()? {
            self.configuration
                .put_as(keys::COMPUTATION_STATE, &ComputationState::None)?;
            self.configuration.remove(keys::ERROR)?;
        }
        tracing::info!(node = %self.node, "computation cleaned");
        Ok(())
    }

    async fn terminate(&self) -> anyhow::Result<()> {
        self.drop_finish_watches();
        let ctx = self.context.lock().take();
        if let Some(ctx) = ctx {
            if ctx.is_running() {
                let _ = ctx.cancel();
            }
            if let Err(e) = ctx.clean_up(self.cfg.cancel_grace_limit()).await {
                tracing::warn!(node = %self.node, error = %e, "task not released cleanly");
                ctx.abort();
            }
        }
        if let Err(e) = self.node_states.remove(self.node.as_str()) {
            tracing::warn!(node = %self.node, error = %e, "could not drop node computation state");
        }
        tracing::info!(node = %self.node, "computation service terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeDescriptor;
    use crate::policies::{BackoffPolicy, JitterPolicy};
    use crate::store::MemoryCluster;
    use crate::task::TaskFn;
    use crate::topology::default_processors;
    use std::time::Duration;

    struct Fixture {
        cluster: Arc<MemoryCluster>,
        service: ComputationService,
        lifecycle: Arc<LifecycleService>,
        topology: Arc<TopologyService>,
    }

    fn fast_config() -> Config {
        Config {
            readiness: BackoffPolicy {
                first: Duration::from_millis(5),
                max: Duration::from_millis(5),
                factor: 1.0,
                jitter: JitterPolicy::None,
            },
            readiness_attempts: 400,
            cancel_grace: Duration::from_millis(200),
            ..Config::default()
        }
    }

    async fn until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn plugins() -> PluginRegistry {
        PluginRegistry::new()
            .with("ok", |_setup| {
                Ok(TaskFn::arc("ok", |_ctx: CancellationToken| async {
                    Ok::<_, TaskError>(())
                }))
            })
            .with("broken", |_setup| {
                Ok(TaskFn::arc("broken", |_ctx: CancellationToken| async {
                    Err::<(), _>(TaskError::Fail {
                        error: "diverged".into(),
                    })
                }))
            })
            .with("spawning", |setup| {
                let runtime = setup
                    .dependencies
                    .get::<Handle>(dependencies::names::RUNTIME)?;
                Ok(TaskFn::arc("spawning", move |_ctx: CancellationToken| {
                    let runtime = Arc::clone(&runtime);
                    async move {
                        runtime
                            .spawn(async { 21 * 2 })
                            .await
                            .map_err(|e| TaskError::Fail { error: e.to_string() })?;
                        Ok::<_, TaskError>(())
                    }
                }))
            })
            .with("endless", |_setup| {
                Ok(TaskFn::arc("endless", |ctx: CancellationToken| async move {
                    ctx.cancelled().await;
                    Err::<(), _>(TaskError::Canceled)
                }))
            })
    }

    async fn fixture() -> Fixture {
        let cluster = MemoryCluster::new();
        cluster.join(NodeDescriptor::compute("n1"));
        let f = member(&cluster, "n1");
        ready(&f).await;
        f
    }

    async fn ready(f: &Fixture) {
        until(|| f.topology.has_topology() && f.lifecycle.is_running()).await;
    }

    /// Node `id` of an already joined cluster, with its services started.
    fn member(cluster: &Arc<MemoryCluster>, id: &str) -> Fixture {
        let cfg = fast_config();
        let bus = Bus::new(64);
        let node = NodeId::from(id);
        let lifecycle =
            Arc::new(LifecycleService::new(node.clone(), &**cluster, bus.clone(), &cfg).unwrap());
        let topology = Arc::new(
            TopologyService::new(node.clone(), &**cluster, default_processors(), bus.clone(), &cfg)
                .unwrap(),
        );
        lifecycle.start();
        topology.start();

        let service = ComputationService::new(
            node,
            ComputationDeps {
                cluster: cluster.clone(),
                topology: Arc::clone(&topology),
                lifecycle: Arc::clone(&lifecycle),
                plugins: Arc::new(plugins()),
                facilities: Vec::new(),
            },
            bus,
            &cfg,
        )
        .unwrap();
        Fixture {
            cluster: Arc::clone(cluster),
            service,
            lifecycle,
            topology,
        }
    }

    fn configure(f: &Fixture, plugin: &str) {
        f.cluster
            .map(names::WORKER_CONFIGURATION)
            .put_as(keys::CONFIGURATION, &WorkerConfiguration::plugin(plugin))
            .unwrap();
    }

    fn error_of(f: &Fixture) -> Option<ComputationFailure> {
        f.cluster
            .map(names::WORKER_CONFIGURATION)
            .get_as(keys::ERROR)
            .unwrap()
    }

    #[tokio::test]
    async fn runs_to_finished_and_cleans() {
        let f = fixture().await;
        configure(&f, "ok");

        f.service.fire(ComputationEvent::Configure);
        until(|| f.service.state() == WorkerState::Configured).await;
        assert_eq!(f.service.local_state().unwrap(), ComputationState::Configured);
        assert_eq!(f.service.global_state().unwrap(), ComputationState::Configured);

        f.service.fire(ComputationEvent::Start);
        until(|| f.service.state() == WorkerState::Finished).await;
        assert_eq!(f.service.local_state().unwrap(), ComputationState::Finished);
        assert_eq!(f.service.global_state().unwrap(), ComputationState::Finished);

        f.service.fire(ComputationEvent::Clean);
        until(|| f.service.state() == WorkerState::Stopped).await;
        assert_eq!(f.service.local_state().unwrap(), ComputationState::None);
        assert_eq!(f.service.global_state().unwrap(), ComputationState::None);
        assert!(f.service.context().is_none());
    }

    #[tokio::test]
    async fn tasks_can_spawn_on_the_registered_runtime() {
        let f = fixture().await;
        configure(&f, "spawning");
        f.service.fire(ComputationEvent::Configure);
        until(|| f.service.state() == WorkerState::Configured).await;
        f.service.fire(ComputationEvent::Start);
        until(|| f.service.state() == WorkerState::Finished).await;
        assert!(error_of(&f).is_none());
    }

    #[tokio::test]
    async fn global_state_follows_the_master_start() {
        let cluster = MemoryCluster::new();
        cluster.join(NodeDescriptor::compute("n1"));
        cluster.join(NodeDescriptor::compute("n2"));
        let slave = member(&cluster, "n1");
        let master = member(&cluster, "n2");
        ready(&slave).await;
        ready(&master).await;
        assert!(master.topology.is_local_node_master().unwrap());
        configure(&master, "endless");

        master.service.fire(ComputationEvent::Configure);
        slave.service.fire(ComputationEvent::Configure);
        until(|| {
            master.service.state() == WorkerState::Configured
                && slave.service.state() == WorkerState::Configured
        })
        .await;

        slave.service.fire(ComputationEvent::Start);
        until(|| slave.service.state() == WorkerState::Executing).await;
        assert_eq!(slave.service.local_state().unwrap(), ComputationState::Running);
        assert_eq!(slave.service.global_state().unwrap(), ComputationState::Configured);
        assert_eq!(master.service.local_state().unwrap(), ComputationState::Configured);

        master.service.fire(ComputationEvent::Start);
        until(|| master.service.state() == WorkerState::Executing).await;
        assert_eq!(slave.service.global_state().unwrap(), ComputationState::Running);

        slave.service.terminate();
        master.service.terminate();
        slave.service.await_termination().await;
        master.service.await_termination().await;
    }

    #[tokio::test]
    async fn missing_configuration_keeps_the_node_stopped() {
        let f = fixture().await;
        f.service.fire(ComputationEvent::Configure);
        f.service.fire(ComputationEvent::Start);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.service.state(), WorkerState::Stopped);
        assert_eq!(f.service.local_state().unwrap(), ComputationState::None);
        assert!(!f.service.machine().is_failed());
    }

    #[tokio::test]
    async fn unknown_plugin_fails_setup_and_records_the_error() {
        let f = fixture().await;
        configure(&f, "missing");
        f.service.fire(ComputationEvent::Configure);
        f.service.fire(ComputationEvent::Start);
        until(|| f.service.state() == WorkerState::Failed).await;

        assert_eq!(f.service.local_state().unwrap(), ComputationState::Failed);
        assert_eq!(f.service.global_state().unwrap(), ComputationState::Failed);
        let failure = error_of(&f).unwrap();
        assert_eq!(failure.kind, "setup_unknown_plugin");
        assert_eq!(failure.node, NodeId::from("n1"));

        f.service.fire(ComputationEvent::Clean);
        until(|| f.service.state() == WorkerState::Stopped).await;
        assert!(error_of(&f).is_none());
    }

    #[tokio::test]
    async fn task_failure_is_propagated_by_the_master() {
        let f = fixture().await;
        configure(&f, "broken");
        f.service.fire(ComputationEvent::Configure);
        f.service.fire(ComputationEvent::Start);
        until(|| f.service.state() == WorkerState::Failed).await;

        assert_eq!(f.service.global_state().unwrap(), ComputationState::Failed);
        let failure = error_of(&f).unwrap();
        assert_eq!(failure.kind, "task_failed");
        assert!(failure.message.contains("diverged"));
    }

    #[tokio::test]
    async fn cancel_interrupts_the_task_without_writing_state() {
        let f = fixture().await;
        configure(&f, "endless");
        f.service.fire(ComputationEvent::Configure);
        f.service.fire(ComputationEvent::Start);
        until(|| f.service.is_task_running()).await;

        f.service.fire(ComputationEvent::Cancel);
        until(|| f.service.state() == WorkerState::Cancelled).await;
        until(|| !f.service.is_task_running()).await;
        assert_eq!(f.service.local_state().unwrap(), ComputationState::Running);

        f.service.fire(ComputationEvent::Clean);
        until(|| f.service.state() == WorkerState::Stopped).await;
    }

    #[tokio::test]
    async fn master_waits_for_every_node_before_finishing() {
        let f = fixture().await;
        let states = f.cluster.map(names::WORKER_STATE);
        states.put_as("n0", &ComputationState::Running).unwrap();
        configure(&f, "ok");

        f.service.fire(ComputationEvent::Configure);
        f.service.fire(ComputationEvent::Start);
        until(|| f.service.state() == WorkerState::Finished).await;
        assert_eq!(f.service.global_state().unwrap(), ComputationState::Running);

        states.put_as("n0", &ComputationState::Finished).unwrap();
        assert_eq!(f.service.global_state().unwrap(), ComputationState::Finished);
    }

    #[tokio::test]
    async fn attaching_node_joins_a_running_computation() {
        let f = fixture().await;
        configure(&f, "ok");
        f.cluster
            .map(names::WORKER_CONFIGURATION)
            .put_as(keys::COMPUTATION_STATE, &ComputationState::Running)
            .unwrap();

        f.service.catch_up().unwrap();
        until(|| f.service.state() == WorkerState::Finished).await;
    }

    #[tokio::test]
    async fn terminate_cancels_the_task_and_drops_the_node_entry() {
        let f = fixture().await;
        configure(&f, "endless");
        f.service.fire(ComputationEvent::Configure);
        f.service.fire(ComputationEvent::Start);
        until(|| f.service.is_task_running()).await;

        let ctx = f.service.context().unwrap();
        f.service.terminate();
        f.service.await_termination().await;
        assert_eq!(f.service.state(), WorkerState::Terminated);
        assert!(!ctx.is_running());
        assert!(
            f.cluster
                .map(names::WORKER_STATE)
                .get("n1")
                .unwrap()
                .is_none()
        );
    }
}
