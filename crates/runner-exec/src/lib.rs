//! Runner Exec
//!
//! Runs build commands for the CI runner. This crate owns everything
//! that touches child processes:
//! - spawning a command through the platform shell
//! - capturing stdout/stderr lines into a shared [`OutputLog`]
//! - enforcing a wall-clock timeout per command
//! - killing the command and every descendant it spawned

pub mod config;
pub mod output;
pub mod process_tree;
pub mod supervisor;
pub mod timeout;

pub use config::SupervisorConfig;
pub use output::OutputLog;
pub use process_tree::{descendants, kill_tree, DescendantTracker, ProcessTable, SystemProcessTable};
pub use supervisor::{
    CommandSpec, ExecOutcome, ProcessSupervisor, SupervisorError, SupervisorResult,
};
pub use timeout::{TimeoutEnforcer, TimeoutStatus};
