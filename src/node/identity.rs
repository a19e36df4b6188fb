//! Node identity and membership descriptors.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Immutable per-process node identifier.
///
/// Ordering is lexicographic; the greatest identifier among compute members is master.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Random identifier for a freshly started process.
    pub fn random() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Role of a cluster member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Runs computations and takes part in election and topology.
    Compute,
    /// Console or client process; never elected, never part of the topology.
    Satellite,
}

/// A member as seen through the membership view.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: NodeId,
    pub kind: NodeKind,
}

impl NodeDescriptor {
    pub fn compute(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Compute,
        }
    }

    pub fn satellite(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Satellite,
        }
    }

    #[inline]
    pub fn is_compute(&self) -> bool {
        self.kind == NodeKind::Compute
    }
}
