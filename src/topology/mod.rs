//! # Topology: master election and graph propagation.
//!
//! - [`TopologyService`] per-node state machine electing the master and caching the graph
//! - [`TopologyProcessor`] named graph constructors (`fully connected`, `ring`, ...)
//! - [`TopologyGraph`] annotated directed graph stored in `topology/config`
//! - [`TopologyClient`] read/write access to the stored settings
//!
//! ## Shared state (`topology/config`)
//! | key            | value                     | writer |
//! |----------------|---------------------------|--------|
//! | `master`       | master node id            | master |
//! | `topologyType` | processor name            | master (initial), any client |
//! | `topologyGraph` | serialized [`TopologyGraph`] | master |

mod client;
mod graph;
mod message;
mod processors;
mod service;

pub use client::TopologyClient;
pub use graph::TopologyGraph;
pub use message::TopologyMessage;
pub use processors::{
    FullyConnected, FullyConnectedWithLoops, Ring, TopologyProcessor, default_processors,
    select_by_priority,
};
pub use service::{TopologyEvent, TopologyService, TopologyState, elect_master};

/// Keys of the `topology/config` map.
pub mod keys {
    pub const MASTER: &str = "master";
    pub const TOPOLOGY_TYPE: &str = "topologyType";
    pub const TOPOLOGY_GRAPH: &str = "topologyGraph";
}
