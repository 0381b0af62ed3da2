//! Signal handling for graceful shutdown (SIGINT/SIGTERM)
//!
//! The first signal requests shutdown: the caller stops the scheduler,
//! which terminates the owned build and joins its worker before the
//! process exits. Later signals are reported and otherwise ignored, so a
//! second Ctrl-C cannot leave build processes orphaned.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::warn;

/// Exit code when the runner stops because of a signal
pub const EXIT_CODE_SIGNALLED: i32 = 130;

const WAIT_POLL: Duration = Duration::from_millis(100);

/// Signal handler state
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Record a signal and return the action to take
    pub fn handle_signal(&self) -> SignalAction {
        let previous = self
            .signal_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(1)))
            .unwrap_or(u8::MAX);

        if previous == 0 {
            self.shutdown_requested.store(true, Ordering::SeqCst);
            SignalAction::RequestShutdown
        } else {
            SignalAction::Ignore
        }
    }

    /// Request shutdown without a signal (service stop, tests)
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: stop the scheduler gracefully
    RequestShutdown,
    /// Shutdown already in progress
    Ignore,
}

/// Installs the process signal handler over a shared [`SignalState`]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    pub fn with_state(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the handler for SIGINT and SIGTERM.
    ///
    /// Must be called once at program startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::RequestShutdown => {
                eprintln!("\nReceived interrupt signal, stopping runner...");
            }
            SignalAction::Ignore => {
                warn!(
                    signals = state.signal_count(),
                    "shutdown already in progress, waiting for the current build to stop"
                );
            }
        })
    }

    /// Block until shutdown has been requested
    pub fn wait_for_shutdown(&self) {
        while !self.state.is_shutdown_requested() {
            thread::sleep(WAIT_POLL);
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
