//! # In-process backend.
//!
//! [`MemoryCluster`] keeps every map, channel and the member list in shared memory.
//! Several nodes built over the same `Arc<MemoryCluster>` behave like members of
//! one cluster: they see the same maps, receive each other's channel messages and
//! observe joins and leaves.
//!
//! `set_available(false)` makes every map and channel operation fail with
//! [`StoreError::Unavailable`], which lets tests exercise backend outages.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::{
    Channel, Cluster, DistributedMap, Listener, Listeners, MapEvent, MapEventKind, Membership,
    MembershipEvent, SubscriptionId,
};
use crate::error::StoreError;
use crate::node::{NodeDescriptor, NodeId};

/// Shared in-memory cluster backend.
pub struct MemoryCluster {
    maps: Mutex<HashMap<String, Arc<MemoryMap>>>,
    channels: Mutex<HashMap<String, Arc<MemoryChannel>>>,
    membership: Arc<MemoryMembership>,
    available: Arc<AtomicBool>,
}

impl MemoryCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            maps: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            membership: Arc::new(MemoryMembership::default()),
            available: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Adds a member and notifies membership listeners. Joining twice is a no-op.
    pub fn join(&self, member: NodeDescriptor) {
        {
            let mut members = self.membership.members.write();
            if members.iter().any(|m| m.id == member.id) {
                return;
            }
            members.push(member.clone());
        }
        tracing::debug!(node = %member.id, kind = ?member.kind, "member joined");
        self.membership
            .listeners
            .notify(&MembershipEvent::Joined(member));
    }

    /// Removes a member and notifies membership listeners.
    pub fn leave(&self, id: &NodeId) {
        let removed = {
            let mut members = self.membership.members.write();
            let pos = members.iter().position(|m| &m.id == id);
            pos.map(|p| members.remove(p))
        };
        if let Some(member) = removed {
            tracing::debug!(node = %member.id, "member left");
            self.membership
                .listeners
                .notify(&MembershipEvent::Left(member));
        }
    }

    /// Simulates a backend outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn memory_map(&self, name: &str) -> Arc<MemoryMap> {
        let mut maps = self.maps.lock();
        let map = maps.entry(name.to_string()).or_insert_with(|| {
            Arc::new(MemoryMap {
                name: Arc::from(name),
                entries: RwLock::new(HashMap::new()),
                watchers: RwLock::new(Vec::new()),
                available: Arc::clone(&self.available),
            })
        });
        Arc::clone(map)
    }

    fn memory_channel(&self, name: &str) -> Arc<MemoryChannel> {
        let mut channels = self.channels.lock();
        let channel = channels.entry(name.to_string()).or_insert_with(|| {
            Arc::new(MemoryChannel {
                name: name.to_string(),
                listeners: Listeners::default(),
                available: Arc::clone(&self.available),
            })
        });
        Arc::clone(channel)
    }
}

impl Cluster for MemoryCluster {
    fn map(&self, name: &str) -> Arc<dyn DistributedMap> {
        self.memory_map(name)
    }

    fn channel(&self, name: &str) -> Arc<dyn Channel> {
        self.memory_channel(name)
    }

    fn membership(&self) -> Arc<dyn Membership> {
        Arc::clone(&self.membership) as Arc<dyn Membership>
    }

    fn connect(&self, member: &NodeDescriptor) -> Result<(), StoreError> {
        check(&self.available, "membership")?;
        self.join(member.clone());
        Ok(())
    }

    fn disconnect(&self, id: &NodeId) {
        self.leave(id);
    }
}

fn check(available: &AtomicBool, name: &str) -> Result<(), StoreError> {
    if available.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(StoreError::Unavailable {
            name: name.to_string(),
            reason: "backend offline".to_string(),
        })
    }
}

struct MemoryMap {
    name: Arc<str>,
    entries: RwLock<HashMap<String, Value>>,
    watchers: RwLock<Vec<(SubscriptionId, String, Listener<MapEvent>)>>,
    available: Arc<AtomicBool>,
}

impl MemoryMap {
    fn notify(&self, key: &str, kind: MapEventKind, value: Option<Value>) {
        let watchers: Vec<Listener<MapEvent>> = self
            .watchers
            .read()
            .iter()
            .filter(|(_, k, _)| k == key)
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        if watchers.is_empty() {
            return;
        }
        let event = MapEvent {
            map: Arc::clone(&self.name),
            key: key.to_string(),
            kind,
            value,
        };
        for watcher in watchers {
            watcher(&event);
        }
    }
}

impl DistributedMap for MemoryMap {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        check(&self.available, &self.name)?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<Option<Value>, StoreError> {
        check(&self.available, &self.name)?;
        let previous = self
            .entries
            .write()
            .insert(key.to_string(), value.clone());
        let kind = if previous.is_some() {
            MapEventKind::Updated
        } else {
            MapEventKind::Added
        };
        self.notify(key, kind, Some(value));
        Ok(previous)
    }

    fn remove(&self, key: &str) -> Result<Option<Value>, StoreError> {
        check(&self.available, &self.name)?;
        let previous = self.entries.write().remove(key);
        if previous.is_some() {
            self.notify(key, MapEventKind::Removed, None);
        }
        Ok(previous)
    }

    fn entries(&self) -> Result<Vec<(String, Value)>, StoreError> {
        check(&self.available, &self.name)?;
        Ok(self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn clear(&self) -> Result<(), StoreError> {
        check(&self.available, &self.name)?;
        let removed: Vec<String> = self.entries.write().drain().map(|(k, _)| k).collect();
        for key in removed {
            self.notify(&key, MapEventKind::Removed, None);
        }
        Ok(())
    }

    fn watch(&self, key: &str, listener: Listener<MapEvent>) -> Result<SubscriptionId, StoreError> {
        check(&self.available, &self.name)?;
        let id = SubscriptionId::next();
        self.watchers.write().push((id, key.to_string(), listener));
        Ok(id)
    }

    fn unwatch(&self, id: SubscriptionId) {
        self.watchers.write().retain(|(sid, _, _)| *sid != id);
    }
}

struct MemoryChannel {
    name: String,
    listeners: Listeners<Bytes>,
    available: Arc<AtomicBool>,
}

impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, message: Bytes) -> Result<(), StoreError> {
        check(&self.available, &self.name)?;
        tracing::trace!(channel = %self.name, bytes = message.len(), subscribers = self.listeners.len(), "publish");
        self.listeners.notify(&message);
        Ok(())
    }

    fn subscribe(&self, listener: Listener<Bytes>) -> Result<SubscriptionId, StoreError> {
        check(&self.available, &self.name)?;
        Ok(self.listeners.add(listener))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.remove(id);
    }
}

#[derive(Default)]
struct MemoryMembership {
    members: RwLock<Vec<NodeDescriptor>>,
    listeners: Listeners<MembershipEvent>,
}

impl Membership for MemoryMembership {
    fn members(&self) -> Vec<NodeDescriptor> {
        self.members.read().clone()
    }

    fn subscribe(&self, listener: Listener<MembershipEvent>) -> SubscriptionId {
        self.listeners.add(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MapExt, TypedChannel, names};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[test]
    fn maps_are_shared_by_name() {
        let cluster = MemoryCluster::new();
        let a = cluster.map(names::TOPOLOGY_CONFIG);
        let b = cluster.map(names::TOPOLOGY_CONFIG);

        a.put("master", json!("node-2")).unwrap();
        assert_eq!(b.get_as::<String>("master").unwrap().as_deref(), Some("node-2"));
        assert!(cluster.map(names::WORKER_STATE).get("master").unwrap().is_none());
    }

    #[test]
    fn watchers_see_only_their_key() {
        let cluster = MemoryCluster::new();
        let map = cluster.map("m");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = map
            .watch(
                "k",
                Arc::new(move |e: &MapEvent| sink.lock().push(e.kind)),
            )
            .unwrap();

        map.put("k", json!(1)).unwrap();
        map.put("other", json!(1)).unwrap();
        map.put("k", json!(2)).unwrap();
        map.remove("k").unwrap();
        map.unwatch(id);
        map.put("k", json!(3)).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                MapEventKind::Added,
                MapEventKind::Updated,
                MapEventKind::Removed
            ]
        );
    }

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Ping(u32);

    #[test]
    fn typed_channel_reaches_every_subscriber() {
        let cluster = MemoryCluster::new();
        let left: TypedChannel<Ping> = TypedChannel::new(cluster.channel("c"));
        let right: TypedChannel<Ping> = TypedChannel::new(cluster.channel("c"));
        let got = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&got);
        let sub = right.subscribe(move |p: Ping| sink.lock().push(p.0)).unwrap();
        left.publish(&Ping(7)).unwrap();

        // Garbage on the raw channel is dropped by the codec.
        cluster.channel("c").publish(Bytes::from_static(b"nope")).unwrap();

        right.unsubscribe(sub);
        left.publish(&Ping(8)).unwrap();
        assert_eq!(*got.lock(), vec![7]);
    }

    #[test]
    fn membership_notifies_joins_and_leaves() {
        let cluster = MemoryCluster::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        cluster
            .membership()
            .subscribe(Arc::new(move |e: &MembershipEvent| sink.lock().push(e.clone())));

        cluster.join(NodeDescriptor::compute("a"));
        cluster.join(NodeDescriptor::compute("a"));
        cluster.join(NodeDescriptor::satellite("console"));
        cluster.leave(&NodeId::from("a"));

        assert_eq!(cluster.membership().members().len(), 1);
        assert_eq!(events.lock().len(), 3);
        assert!(matches!(events.lock()[2], MembershipEvent::Left(_)));
    }

    #[test]
    fn offline_backend_rejects_operations() {
        let cluster = MemoryCluster::new();
        let map = cluster.map("m");
        cluster.set_available(false);
        let err = map.put("k", json!(1)).unwrap_err();
        assert_eq!(err.as_label(), "store_unavailable");
        assert!(cluster.channel("c").publish(Bytes::new()).is_err());

        cluster.set_available(true);
        assert!(map.put("k", json!(1)).is_ok());
    }
}
