//! Messages carried by the `worker/channel` channel.

use std::collections::BTreeSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessageType {
    LoadConfiguration,
    StartComputation,
    PauseComputation,
    ResumeComputation,
    CancelComputation,
    CleanConfiguration,
    BroadcastMessage,
    UnicastControl,
    UnicastMessage,
}

impl WorkerMessageType {
    /// Control types drive the computation and carry no payload.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            WorkerMessageType::LoadConfiguration
                | WorkerMessageType::StartComputation
                | WorkerMessageType::PauseComputation
                | WorkerMessageType::ResumeComputation
                | WorkerMessageType::CancelComputation
                | WorkerMessageType::CleanConfiguration
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMessage {
    #[serde(rename = "type")]
    pub kind: WorkerMessageType,
    /// Delivered to every node regardless of `recipients`.
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default)]
    pub recipients: BTreeSet<NodeId>,
    #[serde(default)]
    pub payload: Option<Bytes>,
}

impl WorkerMessage {
    /// Control message for every node.
    pub fn control(kind: WorkerMessageType) -> Self {
        Self {
            kind,
            broadcast: true,
            recipients: BTreeSet::new(),
            payload: None,
        }
    }

    /// Message without payload for `recipients` only.
    pub fn addressed(kind: WorkerMessageType, recipients: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            kind,
            broadcast: false,
            recipients: recipients.into_iter().collect(),
            payload: None,
        }
    }

    /// Message for `recipients` only.
    pub fn targeted(
        kind: WorkerMessageType,
        recipients: impl IntoIterator<Item = NodeId>,
        payload: Bytes,
    ) -> Self {
        Self {
            payload: Some(payload),
            ..Self::addressed(kind, recipients)
        }
    }

    pub fn is_recipient(&self, node: &NodeId) -> bool {
        self.broadcast || self.recipients.contains(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_messages_reach_everyone() {
        let load = WorkerMessage::control(WorkerMessageType::LoadConfiguration);
        assert!(load.is_recipient(&"anyone".into()));

        let uni = WorkerMessage::targeted(
            WorkerMessageType::UnicastMessage,
            [NodeId::from("x"), NodeId::from("y")],
            Bytes::from_static(b"hi"),
        );
        assert!(uni.is_recipient(&"x".into()));
        assert!(!uni.is_recipient(&"z".into()));
    }

    #[test]
    fn addressed_control_skips_other_nodes() {
        let start = WorkerMessage::addressed(WorkerMessageType::StartComputation, [NodeId::from("x")]);
        assert!(start.kind.is_control());
        assert!(start.is_recipient(&"x".into()));
        assert!(!start.is_recipient(&"z".into()));

        // A wire message without the flag is addressed to its recipients only.
        let wire: WorkerMessage =
            serde_json::from_str(r#"{"type":"START_COMPUTATION","recipients":["X"]}"#).unwrap();
        assert!(!wire.broadcast);
        assert!(!wire.is_recipient(&"Z".into()));
        assert!(wire.is_recipient(&"X".into()));
    }

    #[test]
    fn wire_form_names_the_type() {
        let msg = WorkerMessage::control(WorkerMessageType::CancelComputation);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "CANCEL_COMPUTATION");
        let back: WorkerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }
}
