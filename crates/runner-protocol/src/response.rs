//! Response payloads returned by the coordinator.

use serde::{Deserialize, Serialize};

/// Body of a successful runner registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunnerResponse {
    /// Runner identifier.
    #[serde(default)]
    pub id: u64,
    /// Runner token to use for all later calls.
    #[serde(default)]
    pub token: Option<String>,
}

impl RegisterRunnerResponse {
    /// The issued token, if the coordinator returned a non-empty one.
    pub fn runner_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.trim().is_empty())
    }
}
