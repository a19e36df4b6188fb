//! Named-singleton registry scoped to one computation.
//!
//! Built on `CONFIGURE`, sealed when the task is constructed, destroyed on `CLEAN`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::SetupError;

/// Well-known dependency names registered by the worker.
pub mod names {
    /// [`NodeId`](crate::NodeId) of the local node.
    pub const NODE_ID: &str = "node-id";
    /// `Arc<dyn Cluster>` handle to the backend.
    pub const CLUSTER: &str = "cluster";
    /// `tokio::runtime::Handle` of the runtime driving the node.
    pub const RUNTIME: &str = "runtime";
    /// Resolved configuration document (`serde_json::Value`).
    pub const DOCUMENT: &str = "document";
    /// [`BroadcastMessenger`](crate::worker::BroadcastMessenger).
    pub const BROADCAST_MESSENGER: &str = "broadcast-messenger";
    /// [`UnicastMessenger`](crate::worker::UnicastMessenger).
    pub const UNICAST_MESSENGER: &str = "unicast-messenger";
    /// [`ComputeTopologyProvider`](crate::worker::ComputeTopologyProvider).
    pub const COMPUTE_TOPOLOGY: &str = "compute-topology";
    /// [`QueryCache`](crate::worker::QueryCache).
    pub const QUERY_CACHE: &str = "query-cache";
}

type Entry = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct Dependencies {
    entries: RwLock<HashMap<String, Entry>>,
    sealed: AtomicBool,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` under `name`, replacing any previous entry.
    ///
    /// # Errors
    /// [`SetupError::RegistrySealed`] after [`finish_configuration`](Self::finish_configuration).
    pub fn register<T: Any + Send + Sync>(&self, name: &str, value: Arc<T>) -> Result<(), SetupError> {
        if self.is_sealed() {
            return Err(SetupError::RegistrySealed(name.to_string()));
        }
        self.entries.write().insert(name.to_string(), value);
        Ok(())
    }

    /// Looks up `name` as a `T`.
    ///
    /// # Errors
    /// [`SetupError::MissingDependency`] if absent or registered with another type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, SetupError> {
        let entry = self
            .entries
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SetupError::MissingDependency(name.to_string()))?;
        entry
            .downcast::<T>()
            .map_err(|_| SetupError::MissingDependency(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seals the registry; later registrations fail.
    pub fn finish_configuration(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Drops every singleton.
    pub fn destroy(&self) {
        let dropped = {
            let mut entries = self.entries.write();
            let n = entries.len();
            entries.clear();
            n
        };
        tracing::debug!(dropped, "dependency registry destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_lookup_and_sealing() {
        let deps = Dependencies::new();
        deps.register("answer", Arc::new(42u32)).unwrap();
        assert_eq!(*deps.get::<u32>("answer").unwrap(), 42);

        let wrong = deps.get::<String>("answer").unwrap_err();
        assert_eq!(wrong.as_label(), "setup_missing_dependency");
        assert!(deps.get::<u32>("nothing").is_err());

        deps.finish_configuration();
        let sealed = deps.register("late", Arc::new(1u8)).unwrap_err();
        assert_eq!(sealed.as_label(), "setup_registry_sealed");

        deps.destroy();
        assert!(deps.is_empty());
    }
}
