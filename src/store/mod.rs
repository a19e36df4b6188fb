//! # Distributed store and channel abstraction.
//!
//! The coordination services never talk to a concrete backend. They use three
//! narrow seams, handed out by a [`Cluster`]:
//!
//! - [`DistributedMap`]: named key-value namespace (`get/put/remove/watch`)
//! - [`Channel`]: named publish/subscribe topic carrying opaque bytes
//! - [`Membership`]: the current member list plus join/leave notifications
//!
//! [`MemoryCluster`] implements all three in-process; it backs the tests and demos
//! and lets several nodes share one "cluster" inside a single runtime.
//!
//! ## Rules
//! - Listeners are invoked on the publishing thread, one after another, over a
//!   snapshot of the registered listeners. They must not block.
//! - Delivery is at-least-once from the caller's point of view; no ordering is
//!   promised across publishers.
//! - Values are `serde_json::Value`; [`MapExt`] adds typed access.

mod channel;
mod map;
mod membership;
mod memory;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::StoreError;
use crate::node::{NodeDescriptor, NodeId};

pub use channel::{Channel, TypedChannel};
pub use map::{DistributedMap, MapEvent, MapEventKind, MapExt};
pub use membership::{Membership, MembershipEvent};
pub use memory::MemoryCluster;

/// Well-known map and channel names.
pub mod names {
    /// Master id, topology type and graph.
    pub const TOPOLOGY_CONFIG: &str = "topology/config";
    /// Topology notifications (`TopologyMessage`).
    pub const TOPOLOGY_CHANNEL: &str = "topology/channel";
    /// Computation configuration, global state and error.
    pub const WORKER_CONFIGURATION: &str = "worker/configuration";
    /// Per-node computation state keyed by node id.
    pub const WORKER_STATE: &str = "worker/state";
    /// Worker control messages (`WorkerMessage`).
    pub const WORKER_CHANNEL: &str = "worker/channel";
    /// Agent ids known to the compute-level topology provider.
    pub const WORKER_COMPUTE_TOPOLOGY: &str = "worker/compute-topology";
    /// Query cache entries keyed by node id.
    pub const WORKER_QUERY_CACHE: &str = "worker/query-cache";
    /// Node lifecycle control messages.
    pub const NODE_LIFECYCLE: &str = "node/lifecycle";
    /// Node status reports keyed by node id.
    pub const NODE_STATUS: &str = "node/status";
}

/// Entry points to a concrete backend.
pub trait Cluster: Send + Sync {
    /// Named map; the same name always designates the same shared namespace.
    fn map(&self, name: &str) -> Arc<dyn DistributedMap>;

    /// Named broadcast channel.
    fn channel(&self, name: &str) -> Arc<dyn Channel>;

    /// Membership view.
    fn membership(&self) -> Arc<dyn Membership>;

    /// Announces `member` to the cluster.
    fn connect(&self, member: &NodeDescriptor) -> Result<(), StoreError>;

    /// Withdraws a member; unknown ids are ignored.
    fn disconnect(&self, id: &NodeId);
}

/// Callback registered on a map, channel or membership view.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by every `subscribe`/`watch` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static SUBSCRIPTION_SEQ: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(SUBSCRIPTION_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

/// Listener list with snapshot delivery.
pub(crate) struct Listeners<T> {
    entries: RwLock<Vec<(SubscriptionId, Listener<T>)>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<T> Listeners<T> {
    pub(crate) fn add(&self, listener: Listener<T>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.entries.write().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(sid, _)| *sid != id);
        entries.len() != before
    }

    /// Invokes every listener registered at call time; the lock is not held while calling.
    pub(crate) fn notify(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = self
            .entries
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    pub(crate) fn clear(&self) {
        self.entries.write().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
