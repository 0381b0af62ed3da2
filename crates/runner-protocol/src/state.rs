//! Build state as reported to the coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State string carried by a build update.
///
/// There is deliberately no `waiting` variant: a build is reported as
/// `running` from the first update on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireState {
    Running,
    Success,
    Failed,
    Aborted,
}

impl WireState {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for WireState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_lowercase() {
        let json = serde_json::to_string(&WireState::Aborted).unwrap();
        assert_eq!(json, "\"aborted\"");
        let state: WireState = serde_json::from_str("\"success\"").unwrap();
        assert_eq!(state, WireState::Success);
    }

    #[test]
    fn test_waiting_is_not_a_wire_state() {
        assert!(serde_json::from_str::<WireState>("\"waiting\"").is_err());
    }

    #[test]
    fn test_terminal() {
        assert!(!WireState::Running.is_terminal());
        assert!(WireState::Success.is_terminal());
        assert!(WireState::Failed.is_terminal());
        assert!(WireState::Aborted.is_terminal());
    }
}
