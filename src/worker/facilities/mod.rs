//! Communication facilities available to tasks.

mod broadcast;
mod query;
mod topology;
mod unicast;

pub use broadcast::BroadcastMessenger;
pub use query::QueryCache;
pub use topology::{AgentTopology, ComputeTopologyProvider};
pub use unicast::{Envelope, UnicastMessenger, WorkerAddress};
