//! Read/write access to the cluster topology settings from any process.

use std::sync::Arc;

use super::{TopologyGraph, keys};
use crate::error::StoreError;
use crate::node::NodeId;
use crate::store::{Cluster, DistributedMap, MapExt, names};

/// Thin handle over the `topology/config` map.
///
/// Usable from satellites; writing the topology type makes the master rebuild
/// and re-broadcast the graph.
#[derive(Clone)]
pub struct TopologyClient {
    config: Arc<dyn DistributedMap>,
}

impl TopologyClient {
    pub fn new(cluster: &dyn Cluster) -> Self {
        Self {
            config: cluster.map(names::TOPOLOGY_CONFIG),
        }
    }

    pub fn master_id(&self) -> Result<Option<NodeId>, StoreError> {
        self.config.get_as(keys::MASTER)
    }

    pub fn topology_type(&self) -> Result<Option<String>, StoreError> {
        self.config.get_as(keys::TOPOLOGY_TYPE)
    }

    pub fn set_topology_type(&self, kind: &str) -> Result<(), StoreError> {
        tracing::info!(kind, "requesting topology type");
        self.config.put_as(keys::TOPOLOGY_TYPE, kind)
    }

    pub fn graph(&self) -> Result<Option<TopologyGraph>, StoreError> {
        self.config.get_as(keys::TOPOLOGY_GRAPH)
    }
}
