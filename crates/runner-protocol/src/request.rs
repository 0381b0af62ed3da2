//! Request payloads sent by the runner.

use serde::{Deserialize, Serialize};

use crate::state::WireState;

/// Body of `POST /runners/register.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunnerRequest {
    /// Registration token issued by the coordinator.
    pub token: String,
    /// Public key the coordinator uses to grant repository access.
    pub public_key: String,
}

/// Body of `POST /builds/register.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBuildRequest {
    /// Runner token.
    pub token: String,
}

/// Body of `PUT /builds/{id}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBuildRequest {
    /// Runner token.
    pub token: String,
    /// Current build state.
    pub state: WireState,
    /// Full accumulated output.
    pub trace: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_body_shape() {
        let body = UpdateBuildRequest {
            token: "tok".to_string(),
            state: WireState::Running,
            trace: "line 1\nline 2".to_string(),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["token"], "tok");
        assert_eq!(value["state"], "running");
        assert_eq!(value["trace"], "line 1\nline 2");
    }
}
