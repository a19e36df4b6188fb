//! Cluster membership seam.

use super::{Listener, SubscriptionId};
use crate::node::NodeDescriptor;

/// Change of the member list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(NodeDescriptor),
    Left(NodeDescriptor),
}

impl MembershipEvent {
    pub fn member(&self) -> &NodeDescriptor {
        match self {
            MembershipEvent::Joined(m) | MembershipEvent::Left(m) => m,
        }
    }
}

/// Eventually-consistent view of the cluster members.
pub trait Membership: Send + Sync {
    /// Current members, including the local node once it joined.
    fn members(&self) -> Vec<NodeDescriptor>;

    fn subscribe(&self, listener: Listener<MembershipEvent>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);
}
