//! # Worker side of a node.
//!
//! - [`ComputationService`]: the `compute` state machine and its store writes
//! - [`MessageDispatcher`]: routes `worker/channel` messages to facilities or
//!   built-in computation events
//! - [`facilities`]: broadcast, unicast, compute-level topology and query cache
//! - [`WorkerService`]: wires the above together behind the readiness gate
//! - [`WorkerServiceClient`]: control plane used by consoles and tests

mod client;
mod computation;
mod dispatch;
pub mod facilities;
mod facility;
mod message;
mod readiness;
mod service;
mod state;

pub use client::WorkerServiceClient;
pub use computation::{ComputationDeps, ComputationEvent, ComputationService, WorkerState};
pub use dispatch::{Delivery, MessageDispatcher, builtin_event};
pub use facilities::{
    AgentTopology, BroadcastMessenger, ComputeTopologyProvider, Envelope, QueryCache,
    UnicastMessenger, WorkerAddress,
};
pub use facility::CommunicationFacility;
pub use message::{WorkerMessage, WorkerMessageType};
pub use readiness::{is_ready, wait_ready};
pub use service::WorkerService;
pub use state::{ComputationFailure, ComputationState, keys};
