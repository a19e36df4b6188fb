//! # Node: one cluster member and its services.
//!
//! A [`Node`] owns the event bus, the [`SubscriberSet`] and the three coordination
//! services of a compute member: lifecycle, topology and worker. Satellite members
//! (consoles, control planes) only run the lifecycle service.
//!
//! ```text
//! Node::builder(cluster, descriptor) ─► build() ─► start()
//!
//! start():
//!   subscriber_listener(): Bus.subscribe() ─► SubscriberSet::emit(&Event)
//!   cluster.connect(descriptor)
//!   status.start() ─► lifecycle.start() ─► topology.start() ─► worker.start()
//!
//! shutdown():
//!   Bus.publish(ShutdownRequested)
//!   worker.stop() ─► topology.stop() ─► lifecycle.stop() ─► status.stop()
//!   cluster.disconnect()
//!   wait for termination within cfg.grace:
//!     ├─ all terminated ─► Bus.publish(AllStoppedWithin)
//!     └─ timeout        ─► Bus.publish(GraceExceeded), abort leftovers,
//!                          RuntimeError::GraceExceeded { stuck }
//!   drain the listener, SubscriberSet::shutdown()
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use clustervisor::node::{Node, NodeDescriptor};
//! use clustervisor::store::MemoryCluster;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), clustervisor::RuntimeError> {
//!     let cluster = MemoryCluster::new();
//!     let node = Node::builder(cluster, NodeDescriptor::compute("node-1")).build()?;
//!     node.start()?;
//!
//!     while !node.topology().is_some_and(|t| t.has_topology()) {
//!         tokio::time::sleep(Duration::from_millis(5)).await;
//!     }
//!     node.shutdown().await
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::shutdown::wait_for_shutdown_signal;
use super::{Config, LifecycleService, NodeDescriptor, NodeId, StatusClient, StatusService};
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::store::Cluster;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::task::PluginRegistry;
use crate::topology::{TopologyClient, TopologyProcessor, TopologyService, default_processors};
use crate::worker::{WorkerService, WorkerServiceClient};

/// Assembles a [`Node`].
pub struct NodeBuilder {
    cluster: Arc<dyn Cluster>,
    descriptor: NodeDescriptor,
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    processors: Vec<Arc<dyn TopologyProcessor>>,
    plugins: PluginRegistry,
}

impl NodeBuilder {
    pub fn with_config(mut self, cfg: Config) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the default topology processors.
    pub fn with_processors(mut self, processors: Vec<Arc<dyn TopologyProcessor>>) -> Self {
        self.processors = processors;
        self
    }

    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    /// Builds every service. Must be called inside a tokio runtime.
    pub fn build(mut self) -> Result<Node, RuntimeError> {
        let id = self.descriptor.id.clone();
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let status = StatusService::new(id.clone(), &*self.cluster, self.cfg.status_period);
        self.subscribers.push(status.collector());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));

        let lifecycle = Arc::new(LifecycleService::new(
            id.clone(),
            &*self.cluster,
            bus.clone(),
            &self.cfg,
        )?);

        let (topology, worker) = if self.descriptor.is_compute() {
            let topology = Arc::new(TopologyService::new(
                id.clone(),
                &*self.cluster,
                self.processors,
                bus.clone(),
                &self.cfg,
            )?);
            let worker = WorkerService::new(
                id.clone(),
                Arc::clone(&self.cluster),
                Arc::clone(&topology),
                Arc::clone(&lifecycle),
                Arc::new(self.plugins),
                bus.clone(),
                &self.cfg,
            )?;
            (Some(topology), Some(worker))
        } else {
            (None, None)
        };

        tracing::debug!(node = %id, kind = ?self.descriptor.kind, "node built");
        Ok(Node {
            descriptor: self.descriptor,
            cfg: self.cfg,
            cluster: self.cluster,
            bus,
            lifecycle,
            topology,
            worker,
            status,
            subs: Mutex::new(Some(subs)),
            listener: Mutex::new(None),
            listener_stop: CancellationToken::new(),
            stopping: AtomicBool::new(false),
        })
    }
}

/// A running cluster member.
pub struct Node {
    descriptor: NodeDescriptor,
    cfg: Config,
    cluster: Arc<dyn Cluster>,
    bus: Bus,
    lifecycle: Arc<LifecycleService>,
    topology: Option<Arc<TopologyService>>,
    worker: Option<WorkerService>,
    status: StatusService,
    subs: Mutex<Option<Arc<SubscriberSet>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    listener_stop: CancellationToken,
    stopping: AtomicBool,
}

impl Node {
    /// Starts a builder with the default configuration and topology processors.
    pub fn builder(cluster: Arc<dyn Cluster>, descriptor: NodeDescriptor) -> NodeBuilder {
        NodeBuilder {
            cluster,
            descriptor,
            cfg: Config::default(),
            subscribers: Vec::new(),
            processors: default_processors(),
            plugins: PluginRegistry::new(),
        }
    }

    /// Joins the cluster and starts the services.
    pub fn start(&self) -> Result<(), RuntimeError> {
        self.subscriber_listener();
        self.cluster.connect(&self.descriptor)?;
        self.status.start();
        self.lifecycle.start();
        if let Some(topology) = &self.topology {
            topology.start();
        }
        if let Some(worker) = &self.worker {
            worker.start();
        }
        tracing::info!(node = %self.descriptor.id, kind = ?self.descriptor.kind, "node started");
        Ok(())
    }

    /// Runs until a termination signal or a cluster-wide destroy, then shuts down.
    pub async fn run_until_signal(&self) -> Result<(), RuntimeError> {
        let destroyed = self.lifecycle.destroyed();
        tokio::select! {
            res = wait_for_shutdown_signal() => res?,
            _ = destroyed.cancelled() => {
                tracing::info!(node = %self.descriptor.id, "cluster destroyed");
            }
        }
        self.shutdown().await
    }

    /// Stops every service and waits up to `cfg.grace` for them to terminate.
    ///
    /// Only the first call does any work.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let id = self.descriptor.id.clone();
        tracing::info!(node = %id, "node shutting down");
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_node(id.as_str()));

        if let Some(worker) = &self.worker {
            worker.stop();
        }
        if let Some(topology) = &self.topology {
            topology.stop();
        }
        self.lifecycle.stop();
        self.status.stop();
        self.cluster.disconnect(&id);

        let res = self.wait_all_with_grace().await;
        self.close_subscribers().await;
        res
    }

    async fn wait_all_with_grace(&self) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        if grace.is_zero() {
            return Ok(());
        }
        let done = async {
            if let Some(worker) = &self.worker {
                worker.await_termination().await;
            }
            if let Some(topology) = &self.topology {
                topology.await_termination().await;
            }
            self.lifecycle.await_termination().await;
        };

        match tokio::time::timeout(grace, done).await {
            Ok(()) => {
                self.bus.publish(
                    Event::new(EventKind::AllStoppedWithin).with_node(self.descriptor.id.as_str()),
                );
                Ok(())
            }
            Err(_) => {
                let stuck = self.stuck_services();
                tracing::warn!(node = %self.descriptor.id, ?grace, ?stuck, "shutdown grace exceeded");
                if let Some(worker) = &self.worker {
                    worker.release();
                }
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded)
                        .with_node(self.descriptor.id.as_str())
                        .with_reason(stuck.join(",")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }

    fn stuck_services(&self) -> Vec<String> {
        let mut stuck = Vec::new();
        if self.worker.as_ref().is_some_and(|w| !w.is_terminated()) {
            stuck.push("compute".to_string());
        }
        if self.topology.as_ref().is_some_and(|t| !t.is_terminated()) {
            stuck.push("topology".to_string());
        }
        if !self.lifecycle.is_terminated() {
            stuck.push("lifecycle".to_string());
        }
        stuck
    }

    /// Subscribes to the bus and forwards events to the subscriber set.
    fn subscriber_listener(&self) {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return;
        }
        let Some(set) = self.subs.lock().clone() else {
            return;
        };
        let mut rx = self.bus.subscribe();
        let stop = self.listener_stop.clone();
        let node = self.descriptor.id.clone();
        *listener = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(node = %node, skipped, "subscriber listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            set.emit(&ev);
                        }
                        break;
                    }
                }
            }
        }));
    }

    /// Drains pending bus events into the subscribers and waits for their workers.
    async fn close_subscribers(&self) {
        self.listener_stop.cancel();
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let subs = self.subs.lock().take();
        if let Some(subs) = subs {
            match Arc::try_unwrap(subs) {
                Ok(set) => set.shutdown().await,
                Err(_) => tracing::debug!(node = %self.descriptor.id, "subscriber set still shared"),
            }
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn cluster(&self) -> &Arc<dyn Cluster> {
        &self.cluster
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleService> {
        &self.lifecycle
    }

    /// `None` on satellite members.
    pub fn topology(&self) -> Option<&Arc<TopologyService>> {
        self.topology.as_ref()
    }

    /// `None` on satellite members.
    pub fn worker(&self) -> Option<&WorkerService> {
        self.worker.as_ref()
    }

    /// Cancelled once a cluster-wide destroy stopped this node.
    pub fn destroyed(&self) -> CancellationToken {
        self.lifecycle.destroyed()
    }

    pub fn worker_client(&self) -> WorkerServiceClient {
        WorkerServiceClient::new(Arc::clone(&self.cluster), &self.cfg)
    }

    pub fn topology_client(&self) -> TopologyClient {
        TopologyClient::new(&*self.cluster)
    }

    pub fn status(&self) -> &StatusService {
        &self.status
    }

    pub fn status_client(&self) -> StatusClient {
        StatusClient::new(&*self.cluster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCluster;
    use std::time::Duration;

    #[tokio::test]
    async fn start_joins_and_shutdown_leaves() {
        let cluster = MemoryCluster::new();
        let node = Node::builder(cluster.clone(), NodeDescriptor::compute("a"))
            .build()
            .unwrap();
        let mut rx = node.bus().subscribe();
        node.start().unwrap();
        assert_eq!(cluster.membership().members().len(), 1);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !node.topology().is_some_and(|t| t.has_topology()) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        node.shutdown().await.unwrap();
        assert!(cluster.membership().members().is_empty());
        assert!(node.lifecycle().is_terminated());
        assert!(node.worker().unwrap().is_terminated());
        assert!(node.shutdown().await.is_ok());

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&EventKind::ShutdownRequested));
        assert!(kinds.contains(&EventKind::AllStoppedWithin));
    }

    #[tokio::test]
    async fn satellite_runs_only_the_lifecycle() {
        let cluster = MemoryCluster::new();
        let node = Node::builder(cluster.clone(), NodeDescriptor::satellite("console"))
            .build()
            .unwrap();
        node.start().unwrap();
        assert!(node.topology().is_none());
        assert!(node.worker().is_none());
        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn state_machine_failures_reach_the_status_map() {
        use crate::store::{MapExt, names};
        use crate::topology::keys;

        let cluster = MemoryCluster::new();
        cluster
            .map(names::TOPOLOGY_CONFIG)
            .put_as(keys::TOPOLOGY_TYPE, "hypercube")
            .unwrap();
        let node = Node::builder(cluster.clone(), NodeDescriptor::compute("a"))
            .with_config(Config {
                status_period: Duration::from_millis(10),
                ..Config::default()
            })
            .build()
            .unwrap();
        node.start().unwrap();

        let client = node.status_client();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let report = client.status_of(node.id()).unwrap();
                if report.is_some_and(|r| r.errors.iter().any(|e| e.fsm == "topology")) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn offline_backend_refuses_to_start() {
        let cluster = MemoryCluster::new();
        let node = Node::builder(cluster.clone(), NodeDescriptor::compute("a"))
            .build()
            .unwrap();
        cluster.set_available(false);
        let err = node.start().unwrap_err();
        assert_eq!(err.as_label(), "store_unavailable");
        cluster.set_available(true);
        node.shutdown().await.unwrap();
    }
}
