//! # Node lifecycle service.
//!
//! Smallest of the three coordination state machines. It tells the other services
//! whether the node is up, and turns a cluster-wide `DESTROY` request into a local
//! stop.
//!
//! ```text
//!   OFFLINE ──START──► RUNNING ──CONNECTION_DOWN──► DISCONNECTED
//!                        ▲                              │
//!                        └─────────RECONNECTED──────────┘
//!   (any) ──STOP──► TERMINATED   (cancels `destroyed()`)
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{FsmError, StoreError};
use crate::events::Bus;
use crate::fsm::{EventSender, StateMachine, action};
use crate::node::{Config, NodeId};
use crate::store::{Cluster, SubscriptionId, TypedChannel, names};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Offline,
    Running,
    Disconnected,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Start,
    ConnectionDown,
    Reconnected,
    Stop,
}

/// Control message on the `node/lifecycle` channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleMessage {
    /// Every node receiving it stops.
    Destroy,
}

struct Inner {
    node: NodeId,
    channel: TypedChannel<LifecycleMessage>,
    subscription: Mutex<Option<SubscriptionId>>,
    destroyed: CancellationToken,
    events: EventSender<LifecycleEvent>,
}

/// Lifecycle of the local node.
pub struct LifecycleService {
    inner: Arc<Inner>,
    fsm: StateMachine<LifecycleState, LifecycleEvent>,
}

impl LifecycleService {
    pub fn new(
        node: NodeId,
        cluster: &dyn Cluster,
        bus: Bus,
        cfg: &Config,
    ) -> Result<Self, FsmError> {
        let builder = StateMachine::builder("lifecycle");
        let inner = Arc::new(Inner {
            node,
            channel: TypedChannel::new(cluster.channel(names::NODE_LIFECYCLE)),
            subscription: Mutex::new(None),
            destroyed: CancellationToken::new(),
            events: builder.sender(),
        });

        let start = {
            let inner = Arc::clone(&inner);
            action(move |_t| {
                let inner = Arc::clone(&inner);
                async move { inner.internal_start() }
            })
        };
        let stop = {
            let inner = Arc::clone(&inner);
            action(move |_t| {
                let inner = Arc::clone(&inner);
                async move {
                    inner.internal_stop();
                    Ok(())
                }
            })
        };
        let node = inner.node.clone();

        let fsm = builder
            .initial(LifecycleState::Offline)
            .terminal([LifecycleState::Terminated])
            .transition_with(
                LifecycleState::Offline,
                LifecycleEvent::Start,
                [LifecycleState::Running],
                start,
            )
            .transition(
                LifecycleState::Running,
                LifecycleEvent::ConnectionDown,
                [LifecycleState::Disconnected],
            )
            .transition(
                LifecycleState::Disconnected,
                LifecycleEvent::Reconnected,
                [LifecycleState::Running],
            )
            .any_state_with(LifecycleEvent::Stop, [LifecycleState::Terminated], stop)
            .on_failure(move |e| tracing::error!(node = %node, error = %e, "lifecycle service failed"))
            .notify(bus)
            .with_tick(cfg.tick)
            .with_poll(cfg.termination_poll)
            .build()?;

        Ok(Self { inner, fsm })
    }

    pub fn start(&self) {
        self.fsm.fire(LifecycleEvent::Start);
    }

    pub fn stop(&self) {
        self.fsm.fire(LifecycleEvent::Stop);
    }

    /// Reports a loss of connectivity to the backend.
    pub fn connection_down(&self) {
        self.fsm.fire(LifecycleEvent::ConnectionDown);
    }

    pub fn reconnected(&self) {
        self.fsm.fire(LifecycleEvent::Reconnected);
    }

    /// Left `OFFLINE` and not terminated.
    pub fn is_running(&self) -> bool {
        !(self.fsm.is_in_state(LifecycleState::Offline) || self.fsm.is_terminated())
    }

    pub fn state(&self) -> LifecycleState {
        self.fsm.current_state()
    }

    pub fn is_terminated(&self) -> bool {
        self.fsm.is_terminated()
    }

    /// Cancelled once the node has been stopped.
    pub fn destroyed(&self) -> CancellationToken {
        self.inner.destroyed.clone()
    }

    pub async fn await_termination(&self) {
        self.fsm.await_termination().await;
    }

    pub(crate) fn machine(&self) -> &StateMachine<LifecycleState, LifecycleEvent> {
        &self.fsm
    }
}

impl Inner {
    fn internal_start(&self) -> anyhow::Result<()> {
        let events = self.events.clone();
        let node = self.node.clone();
        let id = self.channel.subscribe(move |msg: LifecycleMessage| match msg {
            LifecycleMessage::Destroy => {
                tracing::debug!(node = %node, "destroy message received");
                events.fire(LifecycleEvent::Stop);
            }
        })?;
        *self.subscription.lock() = Some(id);
        tracing::info!(node = %self.node, "lifecycle service started");
        Ok(())
    }

    fn internal_stop(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.channel.unsubscribe(id);
        }
        tracing::info!(node = %self.node, "destroying the node");
        self.destroyed.cancel();
    }
}

/// Broadcasts `DESTROY` to every node of the cluster.
pub fn destroy_cluster(cluster: &dyn Cluster) -> Result<(), StoreError> {
    TypedChannel::<LifecycleMessage>::new(cluster.channel(names::NODE_LIFECYCLE))
        .publish(&LifecycleMessage::Destroy)
}
