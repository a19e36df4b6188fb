//! # Unicast messaging between worker addresses.
//!
//! Every node owns a random [`WorkerAddress`]. The facility periodically
//! advertises it to its topology neighbours with `UNICAST_CONTROL`, and learns
//! theirs the same way. `UNICAST_MESSAGE` carries an [`Envelope`] to the node
//! owning the destination address; it is always consumed by this facility and
//! delivered to local listeners only when the address matches.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{SetupError, StoreError, WorkerError};
use crate::node::NodeId;
use crate::store::{Listener, Listeners, SubscriptionId, TypedChannel};
use crate::task::{Dependencies, dependencies};
use crate::topology::TopologyService;
use crate::worker::{CommunicationFacility, WorkerMessage, WorkerMessageType};

/// Opaque address of one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerAddress(Uuid);

impl WorkerAddress {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Advertisement {
    address: WorkerAddress,
    node: NodeId,
}

/// Payload of a `UNICAST_MESSAGE`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: WorkerAddress,
    pub to: WorkerAddress,
    pub body: Bytes,
}

/// Publishes this node's address to its topology neighbours.
#[derive(Clone)]
struct Advertiser {
    node: NodeId,
    address: WorkerAddress,
    channel: TypedChannel<WorkerMessage>,
    topology: Arc<TopologyService>,
}

impl Advertiser {
    /// Skipped while the node has no topology.
    fn advertise(&self) -> Result<(), WorkerError> {
        let neighbours = match self.topology.neighbours() {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(node = %self.node, error = %e, "skipping unicast advertisement");
                return Ok(());
            }
        };
        let advert = Advertisement {
            address: self.address,
            node: self.node.clone(),
        };
        self.channel.publish(&WorkerMessage::targeted(
            WorkerMessageType::UnicastControl,
            neighbours,
            encode(&advert)?,
        ))?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, StoreError> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Point-to-point messaging addressed by [`WorkerAddress`].
pub struct UnicastMessenger {
    node: NodeId,
    address: WorkerAddress,
    channel: TypedChannel<WorkerMessage>,
    advertiser: Advertiser,
    known: RwLock<HashMap<WorkerAddress, NodeId>>,
    listeners: Listeners<Envelope>,
    advert_delay: Duration,
    advert_period: Duration,
    ticker: Mutex<Option<CancellationToken>>,
}

impl UnicastMessenger {
    pub fn new(
        node: NodeId,
        channel: TypedChannel<WorkerMessage>,
        topology: Arc<TopologyService>,
        advert_delay: Duration,
        advert_period: Duration,
    ) -> Self {
        let address = WorkerAddress::random();
        Self {
            advertiser: Advertiser {
                node: node.clone(),
                address,
                channel: channel.clone(),
                topology,
            },
            node,
            address,
            channel,
            known: RwLock::new(HashMap::new()),
            listeners: Listeners::default(),
            advert_delay,
            advert_period,
            ticker: Mutex::new(None),
        }
    }

    pub fn address(&self) -> WorkerAddress {
        self.address
    }

    /// Addresses learned from neighbour advertisements.
    pub fn neighbour_addresses(&self) -> Vec<WorkerAddress> {
        let mut addrs: Vec<WorkerAddress> = self.known.read().keys().copied().collect();
        addrs.sort();
        addrs
    }

    /// Sends `body` to the worker at `to`.
    ///
    /// # Errors
    /// [`WorkerError::UnknownAddress`] if `to` was never advertised to this node.
    pub fn send(&self, to: WorkerAddress, body: Bytes) -> Result<(), WorkerError> {
        let node = self
            .known
            .read()
            .get(&to)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownAddress(to.to_string()))?;
        let envelope = Envelope {
            from: self.address,
            to,
            body,
        };
        self.channel.publish(&WorkerMessage::targeted(
            WorkerMessageType::UnicastMessage,
            [node],
            encode(&envelope)?,
        ))?;
        Ok(())
    }

    pub fn subscribe(&self, listener: impl Fn(&Envelope) + Send + Sync + 'static) -> SubscriptionId {
        let listener: Listener<Envelope> = Arc::new(listener);
        self.listeners.add(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.remove(id);
    }

    /// Publishes this node's address to its neighbours now.
    pub fn advertise(&self) -> Result<(), WorkerError> {
        self.advertiser.advertise()
    }

    fn learn(&self, payload: &[u8]) {
        match serde_json::from_slice::<Advertisement>(payload) {
            Ok(advert) if advert.address != self.address => {
                self.known.write().insert(advert.address, advert.node);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(node = %self.node, error = %e, "bad unicast advertisement"),
        }
    }

    fn deliver(&self, payload: &[u8]) {
        match serde_json::from_slice::<Envelope>(payload) {
            Ok(envelope) if envelope.to == self.address => self.listeners.notify(&envelope),
            Ok(envelope) => {
                tracing::trace!(node = %self.node, to = %envelope.to, "unicast message for another worker")
            }
            Err(e) => tracing::warn!(node = %self.node, error = %e, "bad unicast envelope"),
        }
    }
}

impl CommunicationFacility for UnicastMessenger {
    fn name(&self) -> &str {
        "unicast-messenger"
    }

    fn subscribed_types(&self) -> &[WorkerMessageType] {
        &[
            WorkerMessageType::UnicastControl,
            WorkerMessageType::UnicastMessage,
        ]
    }

    fn on_message(&self, message: &WorkerMessage) -> bool {
        let Some(payload) = &message.payload else {
            return true;
        };
        match message.kind {
            WorkerMessageType::UnicastControl => self.learn(payload),
            WorkerMessageType::UnicastMessage => self.deliver(payload),
            _ => return false,
        }
        true
    }

    /// Spawns the advertisement ticker.
    fn start(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self.ticker.lock().replace(token.clone()) {
            previous.cancel();
        }
        let advertiser = self.advertiser.clone();
        let (delay, period) = (self.advert_delay, self.advert_period);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = advertiser.advertise() {
                            tracing::warn!(error = %e, "unicast advertisement failed");
                        }
                    }
                }
            }
        });
    }

    fn reset(&self) {
        self.listeners.clear();
    }

    fn stop(&self) {
        if let Some(token) = self.ticker.lock().take() {
            token.cancel();
        }
    }

    fn provide(self: Arc<Self>, deps: &Dependencies) -> Result<(), SetupError> {
        deps.register(dependencies::names::UNICAST_MESSENGER, self)
    }
}
