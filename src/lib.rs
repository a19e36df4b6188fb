//! # clustervisor
//!
//! **Clustervisor** is a cluster-coordination runtime for distributed compute
//! platforms. Independent nodes join a cluster, deterministically elect a master,
//! agree on a communication topology and run a cluster-wide computation whose
//! lifecycle is tracked per node and globally.
//!
//! Everything is built on one primitive: a thread-safe, event-driven
//! [finite-state machine](fsm) with a single-consumer dispatcher per instance.
//!
//! ## Architecture
//! ```text
//!  ┌──────────────────────────────── Node ────────────────────────────────┐
//!  │                                                                      │
//!  │  LifecycleService      TopologyService          WorkerService        │
//!  │  (fsm "lifecycle")     (fsm "topology")     ┌─ ComputationService ─┐ │
//!  │  OFFLINE/RUNNING/...   election + graph     │  (fsm "compute")     │ │
//!  │        │                     │              │  ComputationContext  │ │
//!  │        │                     │              │  └─ ComputeTask      │ │
//!  │        │                     │              └──────────▲───────────┘ │
//!  │        │                     │                 MessageDispatcher     │
//!  │        │                     │                 └─ facilities         │
//!  └────────┼─────────────────────┼───────────────────────┼───────────────┘
//!           ▼                     ▼                       ▼
//!  ┌──────────────────────── Cluster (store seam) ────────────────────────┐
//!  │ maps:     topology/config  worker/configuration  worker/state  ...   │
//!  │ channels: node/lifecycle   topology/channel      worker/channel      │
//!  │ membership                                                           │
//!  └──────────────────────────────────────────────────────────────────────┘
//!
//!  every fsm ── publish(Event) ──► Bus ──► subscriber_listener ──► SubscriberSet
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                               |
//! |-------------------|--------------------------------------------------------------|--------------------------------------------------|
//! | **FSM engine**    | Declarative tables, async actions, single-consumer dispatch  | [`fsm::StateMachine`], [`fsm::Transit`]          |
//! | **Store seam**    | Maps, channels and membership behind traits                  | [`store::Cluster`], [`store::MemoryCluster`]     |
//! | **Topology**      | Master election and graph propagation                        | [`topology::TopologyService`]                    |
//! | **Worker**        | Computation lifecycle, dispatch and facilities               | [`worker::WorkerService`], [`worker::WorkerServiceClient`] |
//! | **Tasks**         | User computations with pause/cancel and scoped dependencies  | [`ComputeTask`], [`TaskFn`], [`PluginRegistry`]  |
//! | **Status**        | Per-node failure reports in the shared store                 | [`node::StatusService`], [`node::StatusClient`]  |
//! | **Subscribers**   | Observe runtime events                                       | [`Subscribe`], [`Event`]                         |
//! | **Errors**        | Typed errors with stable labels                              | [`TaskError`], [`RuntimeError`]                  |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use clustervisor::node::{Node, NodeDescriptor};
//! use clustervisor::store::MemoryCluster;
//! use clustervisor::task::WorkerConfiguration;
//! use clustervisor::worker::ComputationState;
//! use clustervisor::{PluginRegistry, TaskError, TaskFn};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let plugins = PluginRegistry::new().with("hello", |_setup| {
//!         Ok(TaskFn::arc("hello", |_ctx: CancellationToken| async {
//!             Ok::<_, TaskError>(())
//!         }))
//!     });
//!
//!     let cluster = MemoryCluster::new();
//!     let node = Node::builder(cluster, NodeDescriptor::compute("node-1"))
//!         .with_plugins(plugins)
//!         .build()?;
//!     node.start()?;
//!     while !node.worker().is_some_and(|w| w.is_attached()) {
//!         tokio::time::sleep(Duration::from_millis(5)).await;
//!     }
//!
//!     let client = node.worker_client();
//!     client.prepare_configuration(&WorkerConfiguration::plugin("hello")).await?;
//!     while client.computation_state()? != ComputationState::Configured {
//!         tokio::time::sleep(Duration::from_millis(5)).await;
//!     }
//!     client.start_computation()?;
//!     while client.computation_state()? != ComputationState::Finished {
//!         tokio::time::sleep(Duration::from_millis(5)).await;
//!     }
//!
//!     node.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod error;
pub mod events;
pub mod fsm;
pub mod node;
mod policies;
pub mod store;
pub mod subscribers;
pub mod task;
pub mod topology;
pub mod worker;

// ---- Public re-exports ----

pub use error::{
    FsmError, RuntimeError, SetupError, StoreError, TaskError, TopologyError, WorkerError,
};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use subscribers::{Subscribe, SubscriberSet};
pub use task::{ComputeTask, PluginRegistry, TaskFn, TaskRef};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
