//! Failure Injection for the Mock Coordinator
//!
//! Supports configurable failure injection for testing error paths.

use std::collections::HashMap;
use std::time::Duration;

use super::Endpoint;

/// Failure configuration for an endpoint
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// HTTP status to answer with instead of handling the request
    pub status: Option<u16>,
    /// Fail at the transport level, as if the coordinator were unreachable
    pub unreachable: bool,
    /// Delay to add before responding
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Answer with an HTTP status
    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            unreachable: false,
            delay: None,
            fail_count: None,
        }
    }

    /// Refuse the connection
    pub fn unreachable() -> Self {
        Self {
            status: None,
            unreachable: true,
            delay: None,
            fail_count: None,
        }
    }

    /// Handle normally, but after a delay
    pub fn delay(duration: Duration) -> Self {
        Self {
            status: None,
            unreachable: false,
            delay: Some(duration),
            fail_count: None,
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }

    pub fn is_failure(&self) -> bool {
        self.unreachable || self.status.is_some()
    }
}

/// Failure injector for the mock coordinator
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<Endpoint, FailureConfig>,
    call_counts: HashMap<Endpoint, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for an endpoint, replacing any previous one
    pub fn inject(&mut self, endpoint: Endpoint, config: FailureConfig) {
        self.configs.insert(endpoint, config);
        self.call_counts.insert(endpoint, 0);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_endpoint(&mut self, endpoint: Endpoint) {
        self.configs.remove(&endpoint);
        self.call_counts.remove(&endpoint);
    }

    /// Returns the failure config if this call should fail
    pub fn check(&mut self, endpoint: Endpoint) -> Option<FailureConfig> {
        let config = self.configs.get(&endpoint)?;
        let count = self.call_counts.entry(endpoint).or_insert(0);
        *count += 1;

        if let Some(limit) = config.fail_count {
            if *count > limit {
                return None;
            }
        }
        Some(config.clone())
    }
}
