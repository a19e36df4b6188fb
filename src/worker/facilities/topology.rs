//! Agent-level topology shared by the tasks of one computation.
//!
//! Agents register in `worker/compute-topology` (agent id → owning node). The
//! graph is rebuilt from the registered ids on every query, so every node answers
//! from the same sorted id list.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{SetupError, StoreError};
use crate::node::NodeId;
use crate::store::{DistributedMap, MapExt};
use crate::task::{Dependencies, dependencies};
use crate::topology::TopologyGraph;
use crate::worker::{CommunicationFacility, WorkerMessage, WorkerMessageType};

/// Shape of the agent graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTopology {
    /// Every agent sees every other agent.
    #[default]
    FullMesh,
    /// `i -> i+1`, annotated `right`.
    UniRing,
    /// `i -> i+1` annotated `right` and `i -> i-1` annotated `left`.
    BiRing,
}

pub struct ComputeTopologyProvider {
    node: NodeId,
    agents: Arc<dyn DistributedMap>,
    kind: RwLock<AgentTopology>,
}

impl ComputeTopologyProvider {
    pub fn new(node: NodeId, agents: Arc<dyn DistributedMap>) -> Self {
        Self {
            node,
            agents,
            kind: RwLock::new(AgentTopology::default()),
        }
    }

    pub fn set_kind(&self, kind: AgentTopology) {
        *self.kind.write() = kind;
    }

    pub fn kind(&self) -> AgentTopology {
        *self.kind.read()
    }

    /// Registers an agent hosted by this node.
    pub fn register_agent(&self, agent: &str) -> Result<(), StoreError> {
        self.agents.put_as(agent, &self.node)
    }

    pub fn deregister_agent(&self, agent: &str) -> Result<(), StoreError> {
        self.agents.remove(agent)?;
        Ok(())
    }

    /// Every registered agent id, sorted.
    pub fn agents(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.agents.entries()?.into_iter().map(|(k, _)| k).collect())
    }

    /// Node hosting `agent`.
    pub fn host_of(&self, agent: &str) -> Result<Option<NodeId>, StoreError> {
        self.agents.get_as(agent)
    }

    pub fn graph(&self) -> Result<TopologyGraph, StoreError> {
        let ids: Vec<NodeId> = self.agents()?.into_iter().map(NodeId::from).collect();
        let mut graph = TopologyGraph::with_vertices(ids.iter().cloned());
        let n = ids.len();
        match self.kind() {
            AgentTopology::FullMesh => {
                for a in &ids {
                    for b in ids.iter().filter(|b| *b != a) {
                        graph.add_edge(a.clone(), b.clone());
                    }
                }
            }
            AgentTopology::UniRing | AgentTopology::BiRing if n >= 2 => {
                let bi = self.kind() == AgentTopology::BiRing;
                for (i, a) in ids.iter().enumerate() {
                    graph.add_annotated_edge(a.clone(), ids[(i + 1) % n].clone(), ["right"]);
                    if bi {
                        graph.add_annotated_edge(a.clone(), ids[(i + n - 1) % n].clone(), ["left"]);
                    }
                }
            }
            AgentTopology::UniRing | AgentTopology::BiRing => {}
        }
        Ok(graph)
    }

    pub fn neighbours_of(&self, agent: &str) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .graph()?
            .outgoing(&NodeId::from(agent))
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect())
    }

    /// Neighbours reached over edges carrying `annotation`.
    pub fn neighbours_by_annotation(
        &self,
        agent: &str,
        annotation: &str,
    ) -> Result<BTreeSet<String>, StoreError> {
        let graph = self.graph()?;
        let from = NodeId::from(agent);
        Ok(graph
            .outgoing(&from)
            .into_iter()
            .filter(|to| {
                graph
                    .annotations(&from, to)
                    .is_some_and(|a| a.contains(annotation))
            })
            .map(|id| id.as_str().to_string())
            .collect())
    }

    pub fn are_neighbours(&self, a: &str, b: &str) -> Result<bool, StoreError> {
        Ok(self.graph()?.has_edge(&NodeId::from(a), &NodeId::from(b)))
    }

    /// Removes every agent hosted by this node.
    fn forget_local_agents(&self) -> Result<(), StoreError> {
        for (agent, host) in self.agents.values_as::<NodeId>()? {
            if host == self.node {
                self.agents.remove(&agent)?;
            }
        }
        Ok(())
    }
}

impl CommunicationFacility for ComputeTopologyProvider {
    fn name(&self) -> &str {
        "compute-topology"
    }

    fn subscribed_types(&self) -> &[WorkerMessageType] {
        &[]
    }

    fn on_message(&self, _message: &WorkerMessage) -> bool {
        false
    }

    fn reset(&self) {
        if let Err(e) = self.forget_local_agents() {
            tracing::warn!(node = %self.node, error = %e, "could not deregister local agents");
        }
        self.set_kind(AgentTopology::default());
    }

    fn provide(self: Arc<Self>, deps: &Dependencies) -> Result<(), SetupError> {
        deps.register(dependencies::names::COMPUTE_TOPOLOGY, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Cluster, MemoryCluster, names};

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rings_and_mesh_over_shared_agents() {
        let cluster = MemoryCluster::new();
        let map = cluster.map(names::WORKER_COMPUTE_TOPOLOGY);
        let n1 = ComputeTopologyProvider::new("n1".into(), Arc::clone(&map));
        let n2 = ComputeTopologyProvider::new("n2".into(), map);
        for a in ["a1", "a2"] {
            n1.register_agent(a).unwrap();
        }
        n2.register_agent("a3").unwrap();

        assert_eq!(n2.neighbours_of("a1").unwrap(), set(&["a2", "a3"]));

        n1.set_kind(AgentTopology::BiRing);
        assert_eq!(n1.neighbours_by_annotation("a1", "right").unwrap(), set(&["a2"]));
        assert_eq!(n1.neighbours_by_annotation("a1", "left").unwrap(), set(&["a3"]));
        assert!(n1.are_neighbours("a3", "a1").unwrap());

        n1.set_kind(AgentTopology::UniRing);
        assert!(!n1.are_neighbours("a2", "a1").unwrap());
        assert_eq!(n1.host_of("a3").unwrap(), Some(NodeId::from("n2")));

        n1.reset();
        assert_eq!(n2.agents().unwrap(), set(&["a3"]));
        assert_eq!(n1.kind(), AgentTopology::FullMesh);
    }
}
