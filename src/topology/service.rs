//! # Topology service.
//!
//! Elects a master among the compute members and keeps every node's view of the
//! cluster's topology graph current.
//!
//! ```text
//!   OFFLINE ──START──► STARTING ──STARTED──► MASTER_ELECTED_MASTER ─┐
//!                                      └───► MASTER_ELECTED_SLAVE  ─┤
//!                    (TOPOLOGY_TYPE_CHANGED on master,              │
//!                     TOPOLOGY_CONFIGURED on slave)                 ▼
//!                                                             WITH_TOPOLOGY
//!   MEMBERSHIP_CHANGED from any elected state re-runs the election.
//!   (any) ──STOP──► TERMINATED        (any) ──ERROR──► FAILED
//! ```
//!
//! The master is the compute member with the greatest id. It writes its own id,
//! chooses a topology type if none is stored, builds the graph with the matching
//! [`TopologyProcessor`], stores it and broadcasts `TOPOLOGY_SELECTED`. Every node
//! (master included) reacts by re-reading the graph into a local cache, which is
//! what [`TopologyService::neighbours`] serves.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{TopologyGraph, TopologyMessage, TopologyProcessor, keys, select_by_priority};
use crate::error::{FsmError, TopologyError};
use crate::events::{Bus, Event, EventKind};
use crate::fsm::{EventSender, StateMachine, Transit, action};
use crate::node::{Config, NodeDescriptor, NodeId};
use crate::store::{
    Cluster, DistributedMap, MapEvent, MapEventKind, MapExt, Membership, MembershipEvent,
    SubscriptionId, TypedChannel, names,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopologyState {
    Offline,
    Starting,
    MasterElectedMaster,
    MasterElectedSlave,
    WithTopology,
    Failed,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopologyEvent {
    Start,
    Started,
    MembershipChanged,
    TopologyTypeChanged,
    TopologyConfigured,
    Error,
    Stop,
}

type Tr = Transit<TopologyState, TopologyEvent>;

/// Highest compute id among `members`, or `None` when there is no compute member.
pub fn elect_master<'a>(members: impl IntoIterator<Item = &'a NodeDescriptor>) -> Option<NodeId> {
    members
        .into_iter()
        .filter(|m| m.is_compute())
        .map(|m| m.id.clone())
        .max()
}

#[derive(Default)]
struct Local {
    master: bool,
    kind: Option<String>,
    graph: Option<TopologyGraph>,
    type_watch: Option<SubscriptionId>,
    channel_sub: Option<SubscriptionId>,
    membership_sub: Option<SubscriptionId>,
}

struct Inner {
    node: NodeId,
    config: Arc<dyn DistributedMap>,
    channel: TypedChannel<TopologyMessage>,
    membership: Arc<dyn Membership>,
    processors: Vec<Arc<dyn TopologyProcessor>>,
    events: EventSender<TopologyEvent>,
    bus: Bus,
    local: Mutex<Local>,
}

/// Master election and topology propagation for one node.
pub struct TopologyService {
    inner: Arc<Inner>,
    fsm: StateMachine<TopologyState, TopologyEvent>,
}

macro_rules! step {
    ($inner:expr, |$i:ident, $t:ident| $body:expr) => {{
        let inner = Arc::clone(&$inner);
        action(move |$t: Tr| {
            let $i = Arc::clone(&inner);
            async move { $body }
        })
    }};
}

impl TopologyService {
    pub fn new(
        node: NodeId,
        cluster: &dyn Cluster,
        processors: Vec<Arc<dyn TopologyProcessor>>,
        bus: Bus,
        cfg: &Config,
    ) -> Result<Self, FsmError> {
        use TopologyEvent as Ev;
        use TopologyState as St;

        let builder = StateMachine::builder("topology");
        let inner = Arc::new(Inner {
            node,
            config: cluster.map(names::TOPOLOGY_CONFIG),
            channel: TypedChannel::new(cluster.channel(names::TOPOLOGY_CHANNEL)),
            membership: cluster.membership(),
            processors,
            events: builder.sender(),
            bus: bus.clone(),
            local: Mutex::new(Local::default()),
        });

        let elected = [St::MasterElectedMaster, St::MasterElectedSlave];
        let node = inner.node.clone();

        let fsm = builder
            .initial(St::Offline)
            .terminal([St::Terminated, St::Failed])
            .transition_with(
                St::Offline,
                Ev::Start,
                [St::Starting],
                step!(inner, |i, _t| i.internal_start()),
            )
            .transition(St::Offline, Ev::MembershipChanged, [St::Offline])
            .transition_with(
                St::Starting,
                Ev::Started,
                elected,
                step!(inner, |i, t| i.elect(&t)),
            )
            .transition(St::Starting, Ev::MembershipChanged, [St::Starting])
            // master
            .transition_with(
                St::MasterElectedMaster,
                Ev::MembershipChanged,
                elected,
                step!(inner, |i, t| i.elect(&t)),
            )
            .transition_with(
                St::MasterElectedMaster,
                Ev::TopologyTypeChanged,
                [St::WithTopology],
                step!(inner, |i, _t| i.topology_changed()),
            )
            // slave
            .transition_with(
                St::MasterElectedSlave,
                Ev::MembershipChanged,
                elected,
                step!(inner, |i, t| i.elect(&t)),
            )
            .transition(
                St::MasterElectedSlave,
                Ev::TopologyTypeChanged,
                [St::MasterElectedSlave],
            )
            .transition_with(
                St::MasterElectedSlave,
                Ev::TopologyConfigured,
                [St::WithTopology, St::MasterElectedSlave],
                step!(inner, |i, t| i.topology_configured(&t)),
            )
            // configured
            .transition_with(
                St::WithTopology,
                Ev::MembershipChanged,
                elected,
                step!(inner, |i, t| i.elect(&t)),
            )
            .transition_with(
                St::WithTopology,
                Ev::TopologyTypeChanged,
                [St::WithTopology],
                step!(inner, |i, _t| i.topology_changed()),
            )
            .transition_with(
                St::WithTopology,
                Ev::TopologyConfigured,
                [St::WithTopology],
                step!(inner, |i, t| i.topology_configured(&t)),
            )
            .any_state_with(
                Ev::Stop,
                [St::Terminated],
                step!(inner, |i, _t| {
                    i.internal_stop();
                    Ok(())
                }),
            )
            .any_state_with(
                Ev::Error,
                [St::Failed],
                step!(inner, |i, t| {
                    tracing::error!(node = %i.node, from = ?t.from(), "topology service failed");
                    i.internal_stop();
                    Ok(())
                }),
            )
            .on_failure(move |e| {
                tracing::error!(node = %node, error = %e, label = e.as_label(), "topology state machine failed")
            })
            .notify(bus)
            .with_tick(cfg.tick)
            .with_poll(cfg.termination_poll)
            .build()?;

        Ok(Self { inner, fsm })
    }

    pub fn start(&self) {
        self.fsm.fire(TopologyEvent::Start);
    }

    pub fn stop(&self) {
        self.fsm.fire(TopologyEvent::Stop);
    }

    /// Moves the service to `FAILED`.
    pub fn fail(&self) {
        self.fsm.fire(TopologyEvent::Error);
    }

    pub fn state(&self) -> TopologyState {
        self.fsm.current_state()
    }

    pub fn node(&self) -> &NodeId {
        &self.inner.node
    }

    /// True once this node cached a graph and is in `WITH_TOPOLOGY`.
    pub fn has_topology(&self) -> bool {
        self.fsm.is_in_state(TopologyState::WithTopology)
    }

    /// Master id as stored in the cluster.
    pub fn master_id(&self) -> Result<Option<NodeId>, TopologyError> {
        Ok(self.inner.config.get_as(keys::MASTER)?)
    }

    /// True if the stored master id is this node.
    pub fn is_local_node_master(&self) -> Result<bool, TopologyError> {
        Ok(self.master_id()?.as_ref() == Some(&self.inner.node))
    }

    /// Topology type of the cached graph.
    pub fn topology_type(&self) -> Option<String> {
        self.inner.local.lock().kind.clone()
    }

    /// Copy of the cached graph.
    pub fn topology_graph(&self) -> Option<TopologyGraph> {
        self.inner.local.lock().graph.clone()
    }

    /// Outgoing neighbours of this node in the cached graph.
    ///
    /// # Errors
    /// [`TopologyError::NotReady`] unless the service is in `WITH_TOPOLOGY`.
    pub fn neighbours(&self) -> Result<BTreeSet<NodeId>, TopologyError> {
        let state = self.state();
        let local = self.inner.local.lock();
        match (&local.graph, state) {
            (Some(graph), TopologyState::WithTopology) => Ok(graph.outgoing(&self.inner.node)),
            _ => Err(TopologyError::NotReady {
                state: format!("{state:?}"),
            }),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.fsm.is_terminated()
    }

    pub async fn await_termination(&self) {
        self.fsm.await_termination().await;
    }

    pub(crate) fn machine(&self) -> &StateMachine<TopologyState, TopologyEvent> {
        &self.fsm
    }
}

impl Inner {
    /// Compute members plus this node, which may not be listed yet.
    fn compute_nodes(&self) -> BTreeSet<NodeId> {
        let mut nodes: BTreeSet<NodeId> = self
            .membership
            .members()
            .into_iter()
            .filter(NodeDescriptor::is_compute)
            .map(|m| m.id)
            .collect();
        nodes.insert(self.node.clone());
        nodes
    }

    fn internal_start(&self) -> anyhow::Result<()> {
        let events = self.events.clone();
        let node = self.node.clone();
        let channel_sub = self.channel.subscribe(move |msg: TopologyMessage| match msg {
            TopologyMessage::TopologySelected { kind } => {
                tracing::debug!(node = %node, kind = %kind, "topology selected");
                events.fire(TopologyEvent::TopologyConfigured);
            }
            TopologyMessage::MasterElected { master } => {
                tracing::debug!(node = %node, master = %master, "master announced");
            }
        })?;

        let events = self.events.clone();
        let membership_sub = self.membership.subscribe(Arc::new(move |e: &MembershipEvent| {
            if e.member().is_compute() {
                events.fire(TopologyEvent::MembershipChanged);
            }
        }));

        {
            let mut local = self.local.lock();
            local.channel_sub = Some(channel_sub);
            local.membership_sub = Some(membership_sub);
        }
        tracing::info!(node = %self.node, "topology service started");
        self.events.fire(TopologyEvent::Started);
        Ok(())
    }

    fn internal_stop(&self) {
        let mut local = self.local.lock();
        if let Some(id) = local.channel_sub.take() {
            self.channel.unsubscribe(id);
        }
        if let Some(id) = local.membership_sub.take() {
            self.membership.unsubscribe(id);
        }
        if let Some(id) = local.type_watch.take() {
            self.config.unwatch(id);
        }
        local.master = false;
        tracing::info!(node = %self.node, "topology service stopped");
    }

    fn elect(&self, t: &Tr) -> anyhow::Result<()> {
        let mut members = self.membership.members();
        if !members.iter().any(|m| m.id == self.node) {
            members.push(NodeDescriptor::compute(self.node.clone()));
        }
        let master = elect_master(&members).unwrap_or_else(|| self.node.clone());
        tracing::debug!(node = %self.node, master = %master, members = members.len(), "election");

        if master == self.node {
            self.become_master(t)
        } else {
            self.become_slave(t, &master)
        }
    }

    fn become_master(&self, t: &Tr) -> anyhow::Result<()> {
        self.config.put_as(keys::MASTER, &self.node)?;
        if !self.config.contains_key(keys::TOPOLOGY_TYPE)? {
            let processor = select_by_priority(&self.processors).ok_or(TopologyError::NoProcessors)?;
            tracing::info!(node = %self.node, kind = processor.name(), "initial topology type chosen");
            self.config.put_as(keys::TOPOLOGY_TYPE, processor.name())?;
        }

        let needs_watch = {
            let mut local = self.local.lock();
            local.master = true;
            local.type_watch.is_none()
        };
        if needs_watch {
            let events = self.events.clone();
            let id = self.config.watch(
                keys::TOPOLOGY_TYPE,
                Arc::new(move |e: &MapEvent| {
                    if matches!(e.kind, MapEventKind::Added | MapEventKind::Updated) {
                        events.fire(TopologyEvent::TopologyTypeChanged);
                    }
                }),
            )?;
            self.local.lock().type_watch = Some(id);
        }

        self.events.fire(TopologyEvent::TopologyTypeChanged);
        t.go_to(TopologyState::MasterElectedMaster)?;

        self.channel.publish(&TopologyMessage::MasterElected {
            master: self.node.clone(),
        })?;
        self.bus
            .publish(Event::new(EventKind::MasterElected).with_node(self.node.as_str()));
        tracing::info!(node = %self.node, "elected master");
        Ok(())
    }

    fn become_slave(&self, t: &Tr, master: &NodeId) -> anyhow::Result<()> {
        let watch = {
            let mut local = self.local.lock();
            local.master = false;
            local.type_watch.take()
        };
        if let Some(id) = watch {
            self.config.unwatch(id);
        }
        t.go_to(TopologyState::MasterElectedSlave)?;

        // A graph stored before this election will not be announced again.
        if self.config.contains_key(keys::TOPOLOGY_GRAPH)? {
            self.events.fire(TopologyEvent::TopologyConfigured);
        }
        tracing::info!(node = %self.node, master = %master, "following master");
        Ok(())
    }

    fn topology_changed(&self) -> anyhow::Result<()> {
        if !self.local.lock().master {
            tracing::debug!(node = %self.node, "topology type change ignored on slave");
            return Ok(());
        }
        let kind: String = self
            .config
            .get_as(keys::TOPOLOGY_TYPE)?
            .ok_or_else(|| TopologyError::UnknownProcessor(String::new()))?;
        let processor = self
            .processors
            .iter()
            .find(|p| p.name() == kind)
            .ok_or_else(|| TopologyError::UnknownProcessor(kind.clone()))?;

        let graph = processor.create_graph(&self.compute_nodes());
        tracing::info!(
            node = %self.node,
            kind = %kind,
            vertices = graph.vertices().len(),
            edges = graph.edge_count(),
            "topology graph built"
        );
        self.config.put_as(keys::TOPOLOGY_GRAPH, &graph)?;
        // Cached before the state flips to WITH_TOPOLOGY.
        {
            let mut local = self.local.lock();
            local.kind = Some(kind.clone());
            local.graph = Some(graph);
        }
        self.channel
            .publish(&TopologyMessage::TopologySelected { kind })?;
        Ok(())
    }

    fn topology_configured(&self, t: &Tr) -> anyhow::Result<()> {
        let graph: Option<TopologyGraph> = self.config.get_as(keys::TOPOLOGY_GRAPH)?;
        let Some(graph) = graph else {
            tracing::warn!(node = %self.node, "topology announced but no graph stored");
            t.go_to(t.from())?;
            return Ok(());
        };
        let kind: Option<String> = self.config.get_as(keys::TOPOLOGY_TYPE)?;
        {
            let mut local = self.local.lock();
            local.kind = kind.clone();
            local.graph = Some(graph);
        }
        t.go_to(TopologyState::WithTopology)?;

        let mut event = Event::new(EventKind::TopologyConfigured).with_node(self.node.as_str());
        if let Some(kind) = kind {
            event = event.with_reason(kind);
        }
        self.bus.publish(event);
        Ok(())
    }
}
