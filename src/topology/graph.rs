//! Directed topology graph over node identifiers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Directed graph whose edges carry string annotations (e.g. `right`).
///
/// Built by the master, stored in the shared map and cached by every node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyGraph {
    vertices: BTreeSet<NodeId>,
    edges: BTreeMap<NodeId, BTreeMap<NodeId, BTreeSet<String>>>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vertices(vertices: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            vertices: vertices.into_iter().collect(),
            edges: BTreeMap::new(),
        }
    }

    pub fn add_vertex(&mut self, id: NodeId) {
        self.vertices.insert(id);
    }

    /// Adds `from -> to`; both ends become vertices.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.add_annotated_edge(from, to, std::iter::empty::<String>());
    }

    /// Adds `from -> to` with annotations merged into any existing ones.
    pub fn add_annotated_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        annotations: impl IntoIterator<Item = impl Into<String>>,
    ) {
        self.vertices.insert(from.clone());
        self.vertices.insert(to.clone());
        self.edges
            .entry(from)
            .or_default()
            .entry(to)
            .or_default()
            .extend(annotations.into_iter().map(Into::into));
    }

    pub fn vertices(&self) -> &BTreeSet<NodeId> {
        &self.vertices
    }

    pub fn has_edge(&self, from: &NodeId, to: &NodeId) -> bool {
        self.edges.get(from).is_some_and(|out| out.contains_key(to))
    }

    /// Targets of the outgoing edges of `id`.
    pub fn outgoing(&self, id: &NodeId) -> BTreeSet<NodeId> {
        self.edges
            .get(id)
            .map(|out| out.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn annotations(&self, from: &NodeId, to: &NodeId) -> Option<&BTreeSet<String>> {
        self.edges.get(from).and_then(|out| out.get(to))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }

    /// All edges as `(from, to, annotations)`.
    pub fn edges(&self) -> impl Iterator<Item = (&NodeId, &NodeId, &BTreeSet<String>)> {
        self.edges
            .iter()
            .flat_map(|(from, out)| out.iter().map(move |(to, ann)| (from, to, ann)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotations_merge_on_repeated_edges() {
        let mut g = TopologyGraph::new();
        g.add_annotated_edge("a".into(), "b".into(), ["right"]);
        g.add_annotated_edge("a".into(), "b".into(), ["fast"]);
        g.add_edge("b".into(), "a".into());

        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.annotations(&"a".into(), &"b".into()).map(BTreeSet::len), Some(2));
        assert!(g.annotations(&"b".into(), &"a".into()).unwrap().is_empty());
        assert_eq!(g.outgoing(&"a".into()), BTreeSet::from(["b".into()]));
        assert!(g.outgoing(&"zzz".into()).is_empty());
    }

    #[test]
    fn survives_json_storage() {
        let mut g = TopologyGraph::with_vertices(["x".into(), "y".into()]);
        g.add_annotated_edge("x".into(), "y".into(), ["right"]);
        let value = serde_json::to_value(&g).unwrap();
        let back: TopologyGraph = serde_json::from_value(value).unwrap();
        assert_eq!(back, g);
    }
}
