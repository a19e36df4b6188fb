//! # Node composition.
//!
//! - [`NodeId`] / [`NodeDescriptor`]: identity and member kind
//! - [`Config`]: timing, readiness and shutdown settings
//! - [`LifecycleService`]: the node lifecycle state machine
//! - [`StatusService`] / [`StatusClient`]: per-node failure reports
//! - [`Node`]: wires the bus, subscribers and services of one member

mod config;
mod identity;
mod lifecycle;
mod runtime;
mod shutdown;
mod status;

pub use config::Config;
pub use identity::{NodeDescriptor, NodeId, NodeKind};
pub use lifecycle::{
    LifecycleEvent, LifecycleMessage, LifecycleService, LifecycleState, destroy_cluster,
};
pub use runtime::{Node, NodeBuilder};
pub use shutdown::wait_for_shutdown_signal;
pub use status::{NodeStatus, ServiceFailure, StatusClient, StatusCollector, StatusService};
