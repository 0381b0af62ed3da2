//! Build status state machine
//!
//! WAITING → RUNNING → {SUCCESS | FAILED | ABORTED}, plus WAITING → ABORTED
//! when a build is terminated before its worker starts.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use runner_protocol::WireState;

/// Build status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BuildStatus {
    /// Created, worker not started yet
    Waiting = 0,
    /// Worker is executing commands
    Running = 1,
    /// Every command exited with 0
    Success = 2,
    /// A command failed, or the build could not be planned
    Failed = 3,
    /// Terminated on request
    Aborted = 4,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::Aborted
        )
    }

    /// Check if transition from this status to target is valid
    pub fn can_transition_to(&self, target: BuildStatus) -> bool {
        matches!(
            (self, target),
            (BuildStatus::Waiting, BuildStatus::Running)
                | (BuildStatus::Waiting, BuildStatus::Aborted)
                | (BuildStatus::Running, BuildStatus::Success)
                | (BuildStatus::Running, BuildStatus::Failed)
                | (BuildStatus::Running, BuildStatus::Aborted)
        )
    }

    /// State reported to the coordinator. WAITING is never sent.
    pub fn wire_state(&self) -> WireState {
        match self {
            BuildStatus::Waiting | BuildStatus::Running => WireState::Running,
            BuildStatus::Success => WireState::Success,
            BuildStatus::Failed => WireState::Failed,
            BuildStatus::Aborted => WireState::Aborted,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => BuildStatus::Waiting,
            1 => BuildStatus::Running,
            2 => BuildStatus::Success,
            3 => BuildStatus::Failed,
            _ => BuildStatus::Aborted,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStatus::Waiting => "waiting",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
            BuildStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Status cell shared between the worker and the scheduler.
#[derive(Debug)]
pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(BuildStatus::Waiting as u8))
    }

    pub(crate) fn load(&self) -> BuildStatus {
        BuildStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move `from → to` if the status is still `from` and the edge is legal.
    pub(crate) fn transition(&self, from: BuildStatus, to: BuildStatus) -> bool {
        from.can_transition_to(to)
            && self
                .0
                .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}
