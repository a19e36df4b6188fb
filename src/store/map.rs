//! Distributed key-value map seam.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{Listener, SubscriptionId};
use crate::error::StoreError;

/// What happened to a watched key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapEventKind {
    Added,
    Updated,
    Removed,
}

/// Notification delivered to key watchers.
#[derive(Clone, Debug)]
pub struct MapEvent {
    pub map: Arc<str>,
    pub key: String,
    pub kind: MapEventKind,
    /// New value (`None` on removal).
    pub value: Option<Value>,
}

/// Named key-value namespace shared by every node of a cluster.
///
/// Writes are last-writer-wins; there are no multi-key transactions.
pub trait DistributedMap: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Stores `value` and returns the previous one.
    fn put(&self, key: &str, value: Value) -> Result<Option<Value>, StoreError>;

    /// Removes `key` and returns the previous value.
    fn remove(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn contains_key(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Snapshot of all entries.
    fn entries(&self) -> Result<Vec<(String, Value)>, StoreError>;

    /// Removes every entry.
    fn clear(&self) -> Result<(), StoreError>;

    /// Registers `listener` for changes of `key`.
    fn watch(&self, key: &str, listener: Listener<MapEvent>) -> Result<SubscriptionId, StoreError>;

    fn unwatch(&self, id: SubscriptionId);
}

/// Typed access on top of [`DistributedMap`].
pub trait MapExt {
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError>;

    fn put_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError>;

    fn values_as<T: DeserializeOwned>(&self) -> Result<Vec<(String, T)>, StoreError>;
}

impl<M: DistributedMap + ?Sized> MapExt for M {
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    fn put_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.put(key, serde_json::to_value(value)?)?;
        Ok(())
    }

    fn values_as<T: DeserializeOwned>(&self) -> Result<Vec<(String, T)>, StoreError> {
        self.entries()?
            .into_iter()
            .map(|(k, v)| Ok((k, serde_json::from_value(v)?)))
            .collect()
    }
}
