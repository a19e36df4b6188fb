//! # Node status reports.
//!
//! Every node periodically writes a [`NodeStatus`] under its id in the
//! `node/status` map. The report carries the failures of the node's state
//! machines, collected from [`EventKind::TransitionFailed`] bus events by a
//! [`StatusCollector`] registered in the node's subscriber set.
//!
//! ```text
//! fsm failure ─► Bus ─► SubscriberSet ─► StatusCollector ─► errors
//!                                                             │
//!                    StatusService ticker (cfg.status_period) ┘─► node/status[node]
//!                                                                       │
//!                                              StatusClient::status_of ◄┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::NodeId;
use crate::error::StoreError;
use crate::events::{Event, EventKind};
use crate::store::{Cluster, DistributedMap, MapExt, names};
use crate::subscribers::Subscribe;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// One state machine failure seen on a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFailure {
    /// Name of the failed state machine.
    pub fsm: String,
    /// State it failed in.
    pub state: Option<String>,
    pub reason: String,
    pub at_ms: u64,
}

/// Snapshot published by one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Creation time of this snapshot, in milliseconds since the Unix epoch.
    pub created_ms: u64,
    pub errors: Vec<ServiceFailure>,
}

/// Subscriber collecting state machine failures.
#[derive(Default)]
pub struct StatusCollector {
    errors: RwLock<Vec<ServiceFailure>>,
}

impl StatusCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<ServiceFailure> {
        self.errors.read().clone()
    }
}

#[async_trait]
impl Subscribe for StatusCollector {
    async fn on_event(&self, e: &Event) {
        if e.kind != EventKind::TransitionFailed {
            return;
        }
        let failure = ServiceFailure {
            fsm: e.fsm.as_deref().unwrap_or("-").to_string(),
            state: e.from.as_deref().map(str::to_string),
            reason: e.reason.as_deref().unwrap_or_default().to_string(),
            at_ms: e
                .at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        };
        tracing::debug!(fsm = %failure.fsm, reason = %failure.reason, "service failure recorded");
        self.errors.write().push(failure);
    }

    fn name(&self) -> &'static str {
        "StatusCollector"
    }
}

#[derive(Clone)]
struct Reporter {
    node: NodeId,
    map: Arc<dyn DistributedMap>,
    collector: Arc<StatusCollector>,
}

impl Reporter {
    fn publish(&self) -> Result<(), StoreError> {
        self.map.put_as(
            self.node.as_str(),
            &NodeStatus {
                created_ms: now_ms(),
                errors: self.collector.errors(),
            },
        )
    }
}

/// Periodic publisher of this node's [`NodeStatus`].
pub struct StatusService {
    reporter: Reporter,
    period: Duration,
    ticker: Mutex<Option<CancellationToken>>,
}

impl StatusService {
    pub fn new(node: NodeId, cluster: &dyn Cluster, period: Duration) -> Self {
        Self {
            reporter: Reporter {
                node,
                map: cluster.map(names::NODE_STATUS),
                collector: Arc::new(StatusCollector::new()),
            },
            period,
            ticker: Mutex::new(None),
        }
    }

    /// Subscriber to register on the node's bus.
    pub fn collector(&self) -> Arc<StatusCollector> {
        Arc::clone(&self.reporter.collector)
    }

    /// Writes the current status now.
    pub fn publish_now(&self) -> Result<(), StoreError> {
        self.reporter.publish()
    }

    /// Spawns the publication ticker; the first report goes out after one period.
    pub fn start(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self.ticker.lock().replace(token.clone()) {
            previous.cancel();
        }
        let reporter = self.reporter.clone();
        let period = self.period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reporter.publish() {
                            tracing::warn!(node = %reporter.node, error = %e, "status update failed");
                        }
                    }
                }
            }
        });
        tracing::debug!(node = %self.reporter.node, ?period, "status service started");
    }

    pub fn stop(&self) {
        if let Some(token) = self.ticker.lock().take() {
            token.cancel();
        }
    }
}

/// Control-plane reader of node status reports.
#[derive(Clone)]
pub struct StatusClient {
    map: Arc<dyn DistributedMap>,
}

impl StatusClient {
    pub fn new(cluster: &dyn Cluster) -> Self {
        Self {
            map: cluster.map(names::NODE_STATUS),
        }
    }

    /// Last report of `node`, if it published one.
    pub fn status_of(&self, node: &NodeId) -> Result<Option<NodeStatus>, StoreError> {
        self.map.get_as(node.as_str())
    }

    pub fn all(&self) -> Result<BTreeMap<NodeId, NodeStatus>, StoreError> {
        Ok(self
            .map
            .values_as::<NodeStatus>()?
            .into_iter()
            .map(|(node, status)| (NodeId::from(node), status))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCluster;

    #[tokio::test]
    async fn only_transition_failures_are_collected() {
        let collector = StatusCollector::new();
        collector
            .on_event(&Event::state_changed("compute", "Stopped", "Configure", "Configured"))
            .await;
        collector
            .on_event(&Event::transition_failed(
                "topology",
                "WithTopology",
                Some("TopologyTypeChanged".into()),
                "unknown processor",
            ))
            .await;

        let errors = collector.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].fsm, "topology");
        assert_eq!(errors[0].state.as_deref(), Some("WithTopology"));
        assert_eq!(errors[0].reason, "unknown processor");
    }

    #[tokio::test]
    async fn reports_are_readable_per_node() {
        let cluster = MemoryCluster::new();
        let status = StatusService::new("a".into(), &*cluster, Duration::from_millis(5));
        let client = StatusClient::new(&*cluster);
        assert!(client.status_of(&"a".into()).unwrap().is_none());

        status
            .collector()
            .on_event(&Event::transition_failed("compute", "Executing", None, "boom"))
            .await;
        status.start();
        tokio::time::timeout(Duration::from_secs(1), async {
            while client.status_of(&"a".into()).unwrap().is_none() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        status.stop();

        let report = client.status_of(&"a".into()).unwrap().unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].reason, "boom");
        assert_eq!(client.all().unwrap().len(), 1);
    }
}
