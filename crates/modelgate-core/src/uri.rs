//! Model identifier type
//!
//! Models are addressed by URI everywhere in the gateway: in query
//! parameters, in the transaction message envelope, and as the key of the
//! transaction manager's session map. `ModelUri` carries the normalized form
//! so that `file:/m1` and `file:/m1/` land on the same transaction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized model identifier
///
/// Equality and hashing are by the normalized string: the scheme is
/// lowercased and a trailing slash is dropped. URIs that do not parse as
/// URLs (the upstream accepts bare relative paths) are kept verbatim apart
/// from the trailing-slash rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelUri(String);

impl ModelUri {
    /// Create a model URI, normalizing the raw form
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize(raw.as_ref()))
    }

    /// The normalized string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn normalize(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    // Normalization is purely textual. Re-encoding through a URL parser would
    // rewrite forms like `file:/m1` that the upstream expects verbatim.
    match trimmed.split_once(':') {
        Some((scheme, rest))
            if !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) =>
        {
            format!("{}:{}", scheme.to_ascii_lowercase(), rest)
        }
        _ => trimmed.to_string(),
    }
}

impl fmt::Display for ModelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelUri {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ModelUri {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}
