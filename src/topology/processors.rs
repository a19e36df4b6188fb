//! Topology processors: named graph constructors with a selection priority.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::TopologyGraph;
use crate::node::NodeId;

/// Builds a topology graph over a set of compute nodes.
pub trait TopologyProcessor: Send + Sync {
    /// Stable name stored as the cluster's topology type.
    fn name(&self) -> &str;

    /// Higher wins when the master picks the initial topology type.
    fn priority(&self) -> i32 {
        0
    }

    fn create_graph(&self, nodes: &BTreeSet<NodeId>) -> TopologyGraph;
}

/// Every ordered pair of distinct nodes.
#[derive(Debug, Default)]
pub struct FullyConnected;

impl TopologyProcessor for FullyConnected {
    fn name(&self) -> &str {
        "fully connected"
    }

    fn priority(&self) -> i32 {
        40
    }

    fn create_graph(&self, nodes: &BTreeSet<NodeId>) -> TopologyGraph {
        let mut graph = TopologyGraph::with_vertices(nodes.iter().cloned());
        for from in nodes {
            for to in nodes.iter().filter(|to| *to != from) {
                graph.add_edge(from.clone(), to.clone());
            }
        }
        graph
    }
}

/// Every ordered pair, self-loops included.
#[derive(Debug, Default)]
pub struct FullyConnectedWithLoops;

impl TopologyProcessor for FullyConnectedWithLoops {
    fn name(&self) -> &str {
        "fully connected with local loops"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn create_graph(&self, nodes: &BTreeSet<NodeId>) -> TopologyGraph {
        let mut graph = TopologyGraph::with_vertices(nodes.iter().cloned());
        for from in nodes {
            for to in nodes {
                graph.add_edge(from.clone(), to.clone());
            }
        }
        graph
    }
}

/// Sorted ids, `i -> i+1` and `last -> first`, annotated `right`.
#[derive(Debug, Default)]
pub struct Ring;

impl TopologyProcessor for Ring {
    fn name(&self) -> &str {
        "ring"
    }

    fn create_graph(&self, nodes: &BTreeSet<NodeId>) -> TopologyGraph {
        let mut graph = TopologyGraph::with_vertices(nodes.iter().cloned());
        let ids: Vec<&NodeId> = nodes.iter().collect();
        if ids.len() < 2 {
            return graph;
        }
        for (i, from) in ids.iter().enumerate() {
            let to = ids[(i + 1) % ids.len()];
            graph.add_annotated_edge((*from).clone(), to.clone(), ["right"]);
        }
        graph
    }
}

/// The processors every node ships with.
pub fn default_processors() -> Vec<Arc<dyn TopologyProcessor>> {
    vec![
        Arc::new(FullyConnected),
        Arc::new(FullyConnectedWithLoops),
        Arc::new(Ring),
    ]
}

/// Processor with the highest priority; the first declared wins a tie.
pub fn select_by_priority(
    processors: &[Arc<dyn TopologyProcessor>],
) -> Option<&Arc<dyn TopologyProcessor>> {
    processors
        .iter()
        .rev()
        .max_by_key(|p| p.priority())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> BTreeSet<NodeId> {
        names.iter().map(|n| NodeId::from(*n)).collect()
    }

    #[test]
    fn fully_connected_has_no_self_loops() {
        let g = FullyConnected.create_graph(&ids(&["a", "b", "c"]));
        assert_eq!(g.edge_count(), 6);
        assert!(!g.has_edge(&"a".into(), &"a".into()));
    }

    #[test]
    fn local_loops_variant_includes_self() {
        let g = FullyConnectedWithLoops.create_graph(&ids(&["a", "b", "c"]));
        assert_eq!(g.edge_count(), 9);
        assert!(g.has_edge(&"b".into(), &"b".into()));
    }

    #[test]
    fn ring_closes_on_first_node() {
        let g = Ring.create_graph(&ids(&["c", "a", "b"]));
        assert_eq!(g.edge_count(), 3);
        assert!(g.has_edge(&"a".into(), &"b".into()));
        assert!(g.has_edge(&"b".into(), &"c".into()));
        assert!(g.has_edge(&"c".into(), &"a".into()));
        assert!(g.annotations(&"c".into(), &"a".into()).unwrap().contains("right"));
    }

    #[test]
    fn single_node_ring_has_no_edges() {
        assert_eq!(Ring.create_graph(&ids(&["solo"])).edge_count(), 0);
    }

    #[test]
    fn highest_priority_is_selected() {
        let processors = default_processors();
        let chosen = select_by_priority(&processors).unwrap();
        assert_eq!(chosen.name(), "fully connected with local loops");
        assert!(select_by_priority(&[]).is_none());
    }
}
