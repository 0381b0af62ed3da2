//! CI Runner - build-execution agent for a CI coordinator
//!
//! The runner polls a coordinator for jobs, prepares a checkout of the
//! project on the local machine, runs the job's shell commands under a
//! process supervisor and streams state and output back until the job is
//! finished or cancelled by the coordinator.

pub mod build;
pub mod client;
pub mod config;
pub mod logging;
pub mod mock;
pub mod scheduler;
pub mod signal;
pub mod workspace;

pub use build::{Build, BuildContext, BuildOptions, BuildStatus};
pub use client::{CoordinatorClient, PushOutcome};
pub use config::{EffectiveConfig, RunnerConfig};
pub use scheduler::{Scheduler, SchedulerHandle, TickOutcome};
