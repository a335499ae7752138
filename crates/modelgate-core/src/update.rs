//! Update results and their merge rules
//!
//! Every edit applied through a transaction produces a `ModelUpdateResult`.
//! Nested command expansion and the commit-time trigger loop both need to
//! combine many of these into one aggregate, so the combination rules live
//! here, next to the type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One JSON-Patch operation
///
/// The gateway never interprets patch semantics; operations are carried
/// structurally and handed to the upstream server untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Patch verb: `add`, `remove`, `replace`, `move`, `copy`, `test`
    pub op: String,
    /// JSON-Pointer target path
    pub path: String,
    /// Operand value, absent for `remove`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Source path for `move` and `copy`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl Operation {
    /// Convenience constructor for a `replace` operation
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "replace".to_string(),
            path: path.into(),
            value: Some(value),
            from: None,
        }
    }

    /// Convenience constructor for an `add` operation
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: "add".to_string(),
            path: path.into(),
            value: Some(value),
            from: None,
        }
    }

    /// Convenience constructor for a `remove` operation
    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: "remove".to_string(),
            path: path.into(),
            value: None,
            from: None,
        }
    }
}

/// Result of applying one or more edits to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUpdateResult {
    /// Whether every merged edit succeeded
    pub success: bool,
    /// Concatenated patch operations, in application order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patch: Vec<Operation>,
    /// Most recent full-model snapshot reported by upstream, if any
    #[serde(
        rename = "patchModel",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub patch_model: Option<Value>,
}

impl ModelUpdateResult {
    /// The merge identity: successful, no operations yet
    pub fn empty() -> Self {
        Self {
            success: true,
            patch: Vec::new(),
            patch_model: None,
        }
    }

    /// The failed sentinel returned by rollback and closed-socket paths
    pub fn failed() -> Self {
        Self {
            success: false,
            patch: Vec::new(),
            patch_model: None,
        }
    }

    /// A successful result carrying the given operations
    pub fn with_patch(patch: Vec<Operation>) -> Self {
        Self {
            success: true,
            patch,
            patch_model: None,
        }
    }

    /// Fold another result into this aggregate.
    ///
    /// Success is the logical AND, patches concatenate in merge order, and
    /// the model snapshot is taken from the later result only while the
    /// running aggregate is still successful.
    pub fn merge(&mut self, other: ModelUpdateResult) {
        self.success = self.success && other.success;
        self.patch.extend(other.patch);
        if self.success {
            if let Some(model) = other.patch_model {
                self.patch_model = Some(model);
            }
        }
    }
}

impl Default for ModelUpdateResult {
    fn default() -> Self {
        Self::empty()
    }
}
