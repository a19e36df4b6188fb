//! Computation state values shared through the store.

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Keys of the `worker/configuration` map.
pub mod keys {
    /// Pending [`WorkerConfiguration`](crate::task::WorkerConfiguration).
    pub const CONFIGURATION: &str = "configuration";
    /// Global [`ComputationState`](super::ComputationState), written by the master.
    pub const COMPUTATION_STATE: &str = "computationState";
    /// Last [`ComputationFailure`](super::ComputationFailure), written by the master.
    pub const ERROR: &str = "error";
}

/// Progress of the computation, per node (`worker/state`) and globally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComputationState {
    #[default]
    None,
    Configured,
    Running,
    Finished,
    Failed,
}

/// Error object readable by control-plane clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationFailure {
    /// Stable label of the error (`setup_unknown_plugin`, `task_failed`, ...).
    pub kind: String,
    pub message: String,
    /// Node on which the failure was observed.
    pub node: NodeId,
}
