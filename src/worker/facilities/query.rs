//! Periodic query cache.
//!
//! Each node periodically publishes one node-local JSON value into
//! `worker/query-cache`; [`QueryCache::query`] returns the values of every node
//! whose entry is younger than the configured time-to-live.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{SetupError, StoreError};
use crate::node::NodeId;
use crate::store::{DistributedMap, MapExt};
use crate::task::{Dependencies, dependencies};
use crate::worker::{CommunicationFacility, WorkerMessage, WorkerMessageType};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Entry {
    value: Value,
    published_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Clone)]
struct Publisher {
    node: NodeId,
    map: Arc<dyn DistributedMap>,
    local: Arc<RwLock<Option<Value>>>,
}

impl Publisher {
    fn publish(&self) -> Result<(), StoreError> {
        let Some(value) = self.local.read().clone() else {
            return Ok(());
        };
        self.map.put_as(
            self.node.as_str(),
            &Entry {
                value,
                published_ms: now_ms(),
            },
        )
    }
}

pub struct QueryCache {
    publisher: Publisher,
    period: Duration,
    ttl: Duration,
    ticker: Mutex<Option<CancellationToken>>,
}

impl QueryCache {
    pub fn new(node: NodeId, map: Arc<dyn DistributedMap>, period: Duration, ttl: Duration) -> Self {
        Self {
            publisher: Publisher {
                node,
                map,
                local: Arc::new(RwLock::new(None)),
            },
            period,
            ttl,
            ticker: Mutex::new(None),
        }
    }

    /// Sets the value published by this node from the next period on.
    pub fn set_value(&self, value: Value) {
        *self.publisher.local.write() = Some(value);
    }

    /// Publishes the local value now.
    pub fn publish_now(&self) -> Result<(), StoreError> {
        self.publisher.publish()
    }

    /// Live values, sorted by node id.
    pub fn query(&self) -> Result<Vec<(NodeId, Value)>, StoreError> {
        let now = now_ms();
        let ttl = self.ttl.as_millis() as u64;
        let mut live: Vec<(NodeId, Value)> = self
            .publisher
            .map
            .values_as::<Entry>()?
            .into_iter()
            .filter(|(_, e)| now.saturating_sub(e.published_ms) < ttl)
            .map(|(node, e)| (NodeId::from(node), e.value))
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(live)
    }
}

impl CommunicationFacility for QueryCache {
    fn name(&self) -> &str {
        "query-cache"
    }

    fn subscribed_types(&self) -> &[WorkerMessageType] {
        &[]
    }

    fn on_message(&self, _message: &WorkerMessage) -> bool {
        false
    }

    fn start(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self.ticker.lock().replace(token.clone()) {
            previous.cancel();
        }
        let publisher = self.publisher.clone();
        let mut interval = tokio::time::interval(self.period.max(Duration::from_millis(1)));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = publisher.publish() {
                            tracing::warn!(node = %publisher.node, error = %e, "query cache publication failed");
                        }
                    }
                }
            }
        });
    }

    fn reset(&self) {
        *self.publisher.local.write() = None;
        if let Err(e) = self.publisher.map.remove(self.publisher.node.as_str()) {
            tracing::warn!(node = %self.publisher.node, error = %e, "could not drop query cache entry");
        }
    }

    fn stop(&self) {
        if let Some(token) = self.ticker.lock().take() {
            token.cancel();
        }
    }

    fn provide(self: Arc<Self>, deps: &Dependencies) -> Result<(), SetupError> {
        deps.register(dependencies::names::QUERY_CACHE, self)
    }
}
