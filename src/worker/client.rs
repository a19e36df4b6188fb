//! Control-plane client for the worker services of a cluster.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{ComputationFailure, ComputationState, WorkerMessage, WorkerMessageType, keys};
use crate::error::StoreError;
use crate::node::{Config, NodeId, destroy_cluster};
use crate::store::{Cluster, DistributedMap, MapExt, TypedChannel, names};
use crate::task::WorkerConfiguration;

/// Drives a computation from outside the worker services.
///
/// Every command is a broadcast on `worker/channel`; nodes that are not attached
/// yet pick the computation up from the global state once they are.
#[derive(Clone)]
pub struct WorkerServiceClient {
    cluster: Arc<dyn Cluster>,
    configuration: Arc<dyn DistributedMap>,
    node_states: Arc<dyn DistributedMap>,
    channel: TypedChannel<WorkerMessage>,
    propagation_delay: Duration,
}

impl WorkerServiceClient {
    pub fn new(cluster: Arc<dyn Cluster>, cfg: &Config) -> Self {
        Self {
            configuration: cluster.map(names::WORKER_CONFIGURATION),
            node_states: cluster.map(names::WORKER_STATE),
            channel: TypedChannel::new(cluster.channel(names::WORKER_CHANNEL)),
            propagation_delay: cfg.propagation_delay,
            cluster,
        }
    }

    /// Stores `configuration`, waits `propagation_delay` and broadcasts `LOAD_CONFIGURATION`.
    pub async fn prepare_configuration(
        &self,
        configuration: &WorkerConfiguration,
    ) -> Result<(), StoreError> {
        tracing::debug!(libraries = ?configuration.libraries(), "preparing configuration");
        self.configuration
            .put_as(keys::CONFIGURATION, configuration)?;
        if !self.propagation_delay.is_zero() {
            tokio::time::sleep(self.propagation_delay).await;
        }
        self.broadcast(WorkerMessageType::LoadConfiguration)
    }

    pub fn start_computation(&self) -> Result<(), StoreError> {
        self.broadcast(WorkerMessageType::StartComputation)
    }

    pub fn pause_computation(&self) -> Result<(), StoreError> {
        self.broadcast(WorkerMessageType::PauseComputation)
    }

    pub fn resume_computation(&self) -> Result<(), StoreError> {
        self.broadcast(WorkerMessageType::ResumeComputation)
    }

    /// Cancels the running computation on every node.
    pub fn stop_computation(&self) -> Result<(), StoreError> {
        self.broadcast(WorkerMessageType::CancelComputation)
    }

    pub fn clean_configuration(&self) -> Result<(), StoreError> {
        self.broadcast(WorkerMessageType::CleanConfiguration)
    }

    pub fn is_computation_running(&self) -> Result<bool, StoreError> {
        Ok(self.computation_state()? == ComputationState::Running)
    }

    pub fn computation_state(&self) -> Result<ComputationState, StoreError> {
        Ok(self
            .configuration
            .get_as(keys::COMPUTATION_STATE)?
            .unwrap_or_default())
    }

    pub fn computation_error(&self) -> Result<Option<ComputationFailure>, StoreError> {
        self.configuration.get_as(keys::ERROR)
    }

    /// Per-node states reported in `worker/state`.
    pub fn node_states(&self) -> Result<BTreeMap<NodeId, ComputationState>, StoreError> {
        Ok(self
            .node_states
            .values_as::<ComputationState>()?
            .into_iter()
            .map(|(k, s)| (NodeId::from(k), s))
            .collect())
    }

    /// Stops every node of the cluster.
    pub fn destroy_cluster(&self) -> Result<(), StoreError> {
        tracing::info!("destroying the cluster");
        destroy_cluster(&*self.cluster)
    }

    fn broadcast(&self, kind: WorkerMessageType) -> Result<(), StoreError> {
        tracing::debug!(?kind, "broadcasting control message");
        self.channel.publish(&WorkerMessage::control(kind))
    }
}
