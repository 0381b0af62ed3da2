//! Supervisor configuration.

use std::time::Duration;

/// Process supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Time between SIGTERM and SIGKILL when a command is stopped.
    pub termination_grace: Duration,
    /// How often a running command is checked for exit, timeout and cancellation.
    pub poll_interval: Duration,
    /// How long to wait for output readers after the command has been reaped.
    pub drain_timeout: Duration,
    /// Shell program and the flag that makes it run a single command string.
    pub shell: (String, String),
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            termination_grace: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            drain_timeout: Duration::from_secs(5),
            shell: default_shell(),
        }
    }
}

#[cfg(windows)]
fn default_shell() -> (String, String) {
    ("cmd.exe".to_string(), "/C".to_string())
}

#[cfg(not(windows))]
fn default_shell() -> (String, String) {
    ("sh".to_string(), "-c".to_string())
}

impl SupervisorConfig {
    /// Override the termination grace period.
    pub fn with_termination_grace(mut self, grace: Duration) -> Self {
        self.termination_grace = grace;
        self
    }
}
