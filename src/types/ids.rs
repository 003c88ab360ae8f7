//! Idempotency identifiers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied idempotency token for one gated tool call.
///
/// Ledger rows carrying the same non-empty replay id are deduplicated, so a
/// retried finalize never double-counts or double-credits.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplayId(pub String);

impl ReplayId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Placeholder for callers that have no idempotency token.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl Default for ReplayId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReplayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ReplayId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ReplayId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
