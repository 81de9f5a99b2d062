//! Small identifier newtypes shared across crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of an inbound request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new random request id
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Wrap an existing id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of the caller, resolved from the presented API key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    /// API key id (IAM rules are attached to it)
    pub api_key_id: String,
    /// Project the key belongs to
    pub project_id: String,
    /// Organization owning the project
    pub organization_id: String,
}
