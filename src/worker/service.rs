//! # Worker service.
//!
//! Composes the per-node worker: the four communication facilities, the
//! [`MessageDispatcher`] and the [`ComputationService`].
//!
//! ```text
//! start() ──► wait until ready ──► register facilities + start() hooks
//!                                        │
//!                                        ▼
//!                 subscribe worker/channel → dispatcher ──► catch up with global state
//! ```
//!
//! The attach gate polls until the node is ready or the service is stopped; only
//! `START` itself is bounded by `readiness_attempts`.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::computation::ComputationDeps;
use super::readiness::wait_ready;
use super::{
    BroadcastMessenger, CommunicationFacility, ComputationService, ComputeTopologyProvider,
    ComputationState, MessageDispatcher, QueryCache, UnicastMessenger, WorkerMessage, WorkerState,
};
use crate::error::{StoreError, WorkerError};
use crate::events::Bus;
use crate::node::{Config, LifecycleService, NodeId};
use crate::store::{Cluster, SubscriptionId, TypedChannel, names};
use crate::task::PluginRegistry;
use crate::topology::TopologyService;

/// Per-node worker.
pub struct WorkerService {
    node: NodeId,
    cfg: Config,
    lifecycle: Arc<LifecycleService>,
    topology: Arc<TopologyService>,
    computation: Arc<ComputationService>,
    dispatcher: Arc<MessageDispatcher>,
    channel: TypedChannel<WorkerMessage>,
    facilities: Vec<Arc<dyn CommunicationFacility>>,
    broadcast: Arc<BroadcastMessenger>,
    unicast: Arc<UnicastMessenger>,
    compute_topology: Arc<ComputeTopologyProvider>,
    query: Arc<QueryCache>,
    subscription: Arc<Mutex<Option<SubscriptionId>>>,
    stop: CancellationToken,
    attach: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerService {
    pub fn new(
        node: NodeId,
        cluster: Arc<dyn Cluster>,
        topology: Arc<TopologyService>,
        lifecycle: Arc<LifecycleService>,
        plugins: Arc<PluginRegistry>,
        bus: Bus,
        cfg: &Config,
    ) -> Result<Self, WorkerError> {
        let channel: TypedChannel<WorkerMessage> =
            TypedChannel::new(cluster.channel(names::WORKER_CHANNEL));

        let unicast = Arc::new(UnicastMessenger::new(
            node.clone(),
            channel.clone(),
            Arc::clone(&topology),
            cfg.unicast_advert_delay,
            cfg.unicast_advert_period,
        ));
        let broadcast = Arc::new(BroadcastMessenger::new(
            channel.clone(),
            Arc::clone(&topology),
        ));
        let compute_topology = Arc::new(ComputeTopologyProvider::new(
            node.clone(),
            cluster.map(names::WORKER_COMPUTE_TOPOLOGY),
        ));
        let query = Arc::new(QueryCache::new(
            node.clone(),
            cluster.map(names::WORKER_QUERY_CACHE),
            cfg.query_period,
            cfg.query_ttl,
        ));
        let facilities: Vec<Arc<dyn CommunicationFacility>> = vec![
            Arc::clone(&unicast) as Arc<dyn CommunicationFacility>,
            Arc::clone(&broadcast) as Arc<dyn CommunicationFacility>,
            Arc::clone(&compute_topology) as Arc<dyn CommunicationFacility>,
            Arc::clone(&query) as Arc<dyn CommunicationFacility>,
        ];

        let computation = Arc::new(ComputationService::new(
            node.clone(),
            ComputationDeps {
                cluster,
                topology: Arc::clone(&topology),
                lifecycle: Arc::clone(&lifecycle),
                plugins,
                facilities: facilities.clone(),
            },
            bus,
            cfg,
        )?);
        let dispatcher = Arc::new(MessageDispatcher::new(node.clone(), computation.sender()));

        Ok(Self {
            node,
            cfg: cfg.clone(),
            lifecycle,
            topology,
            computation,
            dispatcher,
            channel,
            facilities,
            broadcast,
            unicast,
            compute_topology,
            query,
            subscription: Arc::new(Mutex::new(None)),
            stop: CancellationToken::new(),
            attach: Mutex::new(None),
        })
    }

    /// Spawns the attach sequence. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut attach = self.attach.lock();
        if attach.is_some() {
            return;
        }

        let node = self.node.clone();
        let gate = Config {
            readiness_attempts: 0,
            ..self.cfg.clone()
        };
        let lifecycle = Arc::clone(&self.lifecycle);
        let topology = Arc::clone(&self.topology);
        let computation = Arc::clone(&self.computation);
        let dispatcher = Arc::clone(&self.dispatcher);
        let channel = self.channel.clone();
        let facilities = self.facilities.clone();
        let subscription = Arc::clone(&self.subscription);
        let stop = self.stop.clone();

        *attach = Some(tokio::spawn(async move {
            if let Err(e) = wait_ready(&lifecycle, &topology, &gate, &stop).await {
                tracing::debug!(node = %node, error = %e, "worker not attached");
                return;
            }
            for facility in facilities {
                dispatcher.register(Arc::clone(&facility));
                facility.start();
            }
            let d = Arc::clone(&dispatcher);
            match channel.subscribe(move |message: WorkerMessage| {
                d.dispatch(&message);
            }) {
                Ok(id) if stop.is_cancelled() => {
                    channel.unsubscribe(id);
                    return;
                }
                Ok(id) => *subscription.lock() = Some(id),
                Err(e) => {
                    tracing::error!(node = %node, error = %e, "worker channel subscription failed");
                    return;
                }
            }
            if let Err(e) = computation.catch_up() {
                tracing::warn!(node = %node, error = %e, "could not read global computation state");
            }
            tracing::info!(node = %node, "worker attached");
        }));
    }

    /// Detaches from the channel, stops facilities and terminates the computation.
    pub fn stop(&self) {
        self.stop.cancel();
        if let Some(id) = self.subscription.lock().take() {
            self.channel.unsubscribe(id);
        }
        for facility in &self.facilities {
            facility.stop();
        }
        self.computation.terminate();
    }

    pub async fn await_termination(&self) {
        self.computation.await_termination().await;
        let handle = self.attach.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Aborts whatever task is left behind a timed-out stop.
    pub(crate) fn release(&self) {
        self.computation.release();
        if let Some(handle) = self.attach.lock().take() {
            handle.abort();
        }
    }

    /// True once the channel subscription is in place.
    pub fn is_attached(&self) -> bool {
        self.subscription.lock().is_some()
    }

    pub fn state(&self) -> WorkerState {
        self.computation.state()
    }

    pub fn is_terminated(&self) -> bool {
        self.computation.is_terminated()
    }

    /// Global computation state as written by the master.
    pub fn global_state(&self) -> Result<ComputationState, StoreError> {
        self.computation.global_state()
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn computation(&self) -> &Arc<ComputationService> {
        &self.computation
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    pub fn broadcast(&self) -> &Arc<BroadcastMessenger> {
        &self.broadcast
    }

    pub fn unicast(&self) -> &Arc<UnicastMessenger> {
        &self.unicast
    }

    pub fn compute_topology(&self) -> &Arc<ComputeTopologyProvider> {
        &self.compute_topology
    }

    pub fn query_cache(&self) -> &Arc<QueryCache> {
        &self.query
    }
}
