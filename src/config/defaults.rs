//! Built-in runner defaults (layer 1)
//!
//! Hardcoded defaults for every tunable. Credentials have no default.

use serde::{Deserialize, Serialize};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Seconds between scheduler cycles (default: 2)
    pub poll_interval_secs: u64,

    /// Attempts per status push before giving up for this cycle (default: 6)
    pub push_attempts: u32,

    /// Fixed delay between push attempts in milliseconds (default: 1000)
    pub push_retry_delay_ms: u64,

    /// Per-request HTTP timeout in seconds (default: 30)
    pub request_timeout_secs: u64,

    /// Command timeout used when a job carries timeout 0 (default: 1800)
    pub default_timeout_secs: u64,

    /// Grace between SIGTERM and SIGKILL when a command is stopped (default: 5)
    pub termination_grace_secs: u64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            push_attempts: 6,
            push_retry_delay_ms: 1000,
            request_timeout_secs: 30,
            default_timeout_secs: 1800,
            termination_grace_secs: 5,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "url": "",
            "token": "",
            "poll_interval_secs": self.poll_interval_secs,
            "push_attempts": self.push_attempts,
            "push_retry_delay_ms": self.push_retry_delay_ms,
            "request_timeout_secs": self.request_timeout_secs,
            "default_timeout_secs": self.default_timeout_secs,
            "termination_grace_secs": self.termination_grace_secs,
            "project": []
        })
    }
}
