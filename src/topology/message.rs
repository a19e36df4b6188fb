//! Messages exchanged on the `topology/channel` channel.

use serde::{Deserialize, Serialize};

use crate::node::NodeId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopologyMessage {
    /// A node elected itself master.
    MasterElected { master: NodeId },
    /// The master stored a new graph; every node should re-read it.
    TopologySelected { kind: String },
}
