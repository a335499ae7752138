//! Transaction wire protocol
//!
//! JSON message envelope spoken over the per-transaction WebSocket with the
//! upstream model server. Outbound messages are `execute`, `close`, and
//! `roll-back`; inbound replies are `success`, `error`, or
//! `incrementalUpdate`. The very first inbound frame is not an envelope at
//! all but a plain-text transaction UUID, handled one layer up.

use crate::update::{ModelUpdateResult, Operation};
use crate::uri::ModelUri;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminator for a command payload inside an `execute` message
pub const COMMAND_TYPE: &str = "modelserver.emfcommand";
/// Discriminator for a patch payload inside an `execute` message
pub const PATCH_TYPE: &str = "modelserver.patch";

/// Message kinds carried in the envelope `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Apply an edit (outbound)
    Execute,
    /// Commit the transaction and end the session (outbound)
    Close,
    /// Abort the transaction and end the session (outbound)
    RollBack,
    /// Edit reply carrying the resulting delta (inbound)
    IncrementalUpdate,
    /// Edit reply: applied successfully (inbound)
    Success,
    /// Edit reply: rejected (inbound)
    Error,
    /// Anything this version does not know
    Unknown,
}

impl MessageKind {
    /// Wire spelling of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Close => "close",
            Self::RollBack => "roll-back",
            Self::IncrementalUpdate => "incrementalUpdate",
            Self::Success => "success",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl From<&str> for MessageKind {
    fn from(raw: &str) -> Self {
        match raw {
            "execute" => Self::Execute,
            "close" => Self::Close,
            "roll-back" => Self::RollBack,
            "incrementalUpdate" => Self::IncrementalUpdate,
            "success" => Self::Success,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl Serialize for MessageKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// Envelope for every JSON message on the transaction socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionMessage {
    /// Message kind
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Model this transaction operates on
    #[serde(default)]
    pub modeluri: String,
    /// Kind-specific payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TransactionMessage {
    /// Build an `execute` message for the given edit
    pub fn execute(modeluri: &ModelUri, edit: &CommandOrPatch) -> crate::Result<Self> {
        Ok(Self {
            kind: MessageKind::Execute,
            modeluri: modeluri.to_string(),
            data: Some(serde_json::to_value(edit)?),
        })
    }

    /// Build the `close` terminator sent at successful commit
    pub fn close(modeluri: &ModelUri) -> Self {
        Self {
            kind: MessageKind::Close,
            modeluri: modeluri.to_string(),
            data: None,
        }
    }

    /// Build the `roll-back` terminator sent on failure
    pub fn roll_back(modeluri: &ModelUri, reason: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::RollBack,
            modeluri: modeluri.to_string(),
            data: Some(Value::String(reason.into())),
        }
    }

    /// Interpret a reply envelope as an update result.
    ///
    /// Replies are accepted permissively: failures still contribute whatever
    /// patch they carry, and payloads that do not conform to the update
    /// shape come back as a failed result rather than an error. The channel
    /// is strict request/reply after the UUID, so every inbound frame is the
    /// answer to the most recent `execute`.
    pub fn to_update_result(&self) -> ModelUpdateResult {
        let default_success = match self.kind {
            MessageKind::Success | MessageKind::IncrementalUpdate => true,
            _ => false,
        };
        let Some(data) = &self.data else {
            return ModelUpdateResult {
                success: default_success,
                patch: Vec::new(),
                patch_model: None,
            };
        };
        match data {
            // A bare array is a patch with the kind deciding success.
            Value::Array(_) => match parse_operations(data.clone()) {
                Some(patch) => ModelUpdateResult {
                    success: default_success,
                    patch,
                    patch_model: None,
                },
                None => ModelUpdateResult::failed(),
            },
            Value::Object(map) => {
                let success = map
                    .get("success")
                    .and_then(Value::as_bool)
                    .unwrap_or(default_success);
                let patch = match map.get("patch") {
                    Some(p) => match parse_operations(p.clone()) {
                        Some(ops) => ops,
                        None => return ModelUpdateResult::failed(),
                    },
                    None => Vec::new(),
                };
                let patch_model = map
                    .get("patchModel")
                    .filter(|v| !v.is_null())
                    .cloned();
                ModelUpdateResult {
                    success,
                    patch,
                    patch_model,
                }
            }
            // Strings and other scalars carry no update information.
            _ => ModelUpdateResult {
                success: default_success,
                patch: Vec::new(),
                patch_model: None,
            },
        }
    }
}

/// An edit payload: either an opaque command or a JSON-Patch
///
/// Serialized in the `{type, data}` shape the upstream expects, with the
/// `modelserver.*` discriminators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CommandOrPatch {
    /// Opaque structured command; the inner object carries its own type tag
    #[serde(rename = "modelserver.emfcommand")]
    Command(Value),
    /// JSON-Patch operation sequence
    #[serde(rename = "modelserver.patch", with = "one_or_many")]
    Patch(Vec<Operation>),
}

impl CommandOrPatch {
    /// Command type tag of the inner command, if this is a command
    pub fn command_type(&self) -> Option<&str> {
        match self {
            Self::Command(value) => value.get("type").and_then(Value::as_str),
            Self::Patch(_) => None,
        }
    }
}

/// Parse an operation payload that may be a single operation or an array
fn parse_operations(value: Value) -> Option<Vec<Operation>> {
    match value {
        Value::Array(_) => serde_json::from_value(value).ok(),
        Value::Object(_) => serde_json::from_value::<Operation>(value)
            .ok()
            .map(|op| vec![op]),
        _ => None,
    }
}

/// Serde adapter: the wire allows `Operation | Operation[]`; we always emit
/// the array form and accept both.
mod one_or_many {
    use super::Operation;
    use serde::de::Deserializer;
    use serde::ser::Serializer;
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(Operation),
        Many(Vec<Operation>),
    }

    pub fn serialize<S: Serializer>(ops: &[Operation], serializer: S) -> Result<S::Ok, S::Error> {
        ops.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Operation>, D::Error> {
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(op) => vec![op],
            OneOrMany::Many(ops) => ops,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execute_envelope_shape() {
        let uri = ModelUri::new("file:/m1");
        let edit = CommandOrPatch::Patch(vec![Operation::replace("/name", json!("X"))]);
        let msg = TransactionMessage::execute(&uri, &edit).unwrap();
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            wire,
            json!({
                "type": "execute",
                "modeluri": "file:/m1",
                "data": {
                    "type": "modelserver.patch",
                    "data": [{"op": "replace", "path": "/name", "value": "X"}]
                }
            })
        );
    }

    #[test]
    fn test_command_envelope_keeps_inner_tag() {
        let edit = CommandOrPatch::Command(json!({"type": "compound", "commands": []}));
        assert_eq!(edit.command_type(), Some("compound"));
        let wire = serde_json::to_value(&edit).unwrap();
        assert_eq!(wire["type"], "modelserver.emfcommand");
        assert_eq!(wire["data"]["type"], "compound");
    }

    #[test]
    fn test_patch_accepts_single_operation() {
        let parsed: CommandOrPatch = serde_json::from_value(json!({
            "type": "modelserver.patch",
            "data": {"op": "remove", "path": "/x"}
        }))
        .unwrap();
        assert_eq!(
            parsed,
            CommandOrPatch::Patch(vec![Operation::remove("/x")])
        );
    }

    #[test]
    fn test_unknown_kind_deserializes() {
        let msg: TransactionMessage =
            serde_json::from_str(r#"{"type": "chitchat", "modeluri": "file:/m1"}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Unknown);
    }

    #[test]
    fn test_reply_with_patch_and_success() {
        let msg: TransactionMessage = serde_json::from_value(json!({
            "type": "incrementalUpdate",
            "modeluri": "file:/m1",
            "data": {
                "success": true,
                "patch": [{"op": "replace", "path": "/name", "value": "X"}]
            }
        }))
        .unwrap();
        let result = msg.to_update_result();
        assert!(result.success);
        assert_eq!(result.patch.len(), 1);
    }

    #[test]
    fn test_failed_reply_still_contributes_patch() {
        let msg: TransactionMessage = serde_json::from_value(json!({
            "type": "error",
            "modeluri": "file:/m1",
            "data": {
                "patch": [{"op": "remove", "path": "/stale"}]
            }
        }))
        .unwrap();
        let result = msg.to_update_result();
        assert!(!result.success);
        assert_eq!(result.patch.len(), 1);
    }

    #[test]
    fn test_non_conforming_reply_is_failure() {
        let msg: TransactionMessage = serde_json::from_value(json!({
            "type": "incrementalUpdate",
            "modeluri": "file:/m1",
            "data": {"patch": [{"not": "an op"}]}
        }))
        .unwrap();
        assert_eq!(msg.to_update_result(), ModelUpdateResult::failed());
    }
}
