//! Build lifecycle
//!
//! A [`Build`] owns one job: it plans the workspace commands, runs them in
//! order through a [`ProcessSupervisor`] and accumulates their output into a
//! shared [`OutputLog`]. [`Build::run`] blocks and is meant for a dedicated
//! worker thread; every other method is safe to call from the scheduler
//! while the worker runs.

mod env;
mod status;

pub use env::build_env;
pub use status::BuildStatus;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use runner_exec::{CommandSpec, OutputLog, ProcessSupervisor, SupervisorConfig};
use runner_protocol::{JobDescriptor, ProtocolError, WireState};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ProjectSettingsSource, RunnerConfig, SettingsError};
use crate::workspace::{WorkspaceError, WorkspaceManager};
use status::AtomicStatus;

/// Errors that stop a build before its commands run
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("job cannot be checked out: {0}")]
    InvalidJob(#[from] ProtocolError),
}

/// Tunables applied to every build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Command timeout when the job does not carry one
    pub default_timeout: Duration,
    pub supervisor: SupervisorConfig,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(1800),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl BuildOptions {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            default_timeout: config.default_timeout(),
            supervisor: SupervisorConfig::default()
                .with_termination_grace(config.termination_grace()),
        }
    }
}

/// Everything needed to turn a job descriptor into a [`Build`].
#[derive(Clone)]
pub struct BuildContext {
    settings: Arc<dyn ProjectSettingsSource>,
    workspace: WorkspaceManager,
    options: BuildOptions,
}

impl BuildContext {
    pub fn new(
        settings: Arc<dyn ProjectSettingsSource>,
        workspace: WorkspaceManager,
        options: BuildOptions,
    ) -> Self {
        Self {
            settings,
            workspace,
            options,
        }
    }

    pub fn build(&self, job: JobDescriptor) -> Build {
        Build::new(
            job,
            Arc::clone(&self.settings),
            self.workspace.clone(),
            &self.options,
        )
    }
}

/// One job's execution
pub struct Build {
    job: JobDescriptor,
    settings: Arc<dyn ProjectSettingsSource>,
    workspace: WorkspaceManager,
    supervisor: ProcessSupervisor,
    timeout: Duration,
    output: OutputLog,
    status: AtomicStatus,
    /// Set after the final status, as the worker's last step
    completed: AtomicBool,
    project_dir: OnceLock<PathBuf>,
    commands: OnceLock<Vec<String>>,
}

impl Build {
    pub fn new(
        job: JobDescriptor,
        settings: Arc<dyn ProjectSettingsSource>,
        workspace: WorkspaceManager,
        options: &BuildOptions,
    ) -> Self {
        let timeout = if job.timeout == 0 {
            options.default_timeout
        } else {
            Duration::from_secs(job.timeout)
        };
        Self {
            job,
            settings,
            workspace,
            supervisor: ProcessSupervisor::new(options.supervisor.clone()),
            timeout,
            output: OutputLog::new(),
            status: AtomicStatus::new(),
            completed: AtomicBool::new(false),
            project_dir: OnceLock::new(),
            commands: OnceLock::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.job.id
    }

    pub fn job(&self) -> &JobDescriptor {
        &self.job
    }

    pub fn status(&self) -> BuildStatus {
        self.status.load()
    }

    pub fn wire_state(&self) -> WireState {
        self.status().wire_state()
    }

    /// True once the worker has finished and the status is final.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Trace so far: leading blank lines dropped, lines joined with `\n`.
    pub fn output(&self) -> String {
        self.output.snapshot()
    }

    pub fn output_log(&self) -> &OutputLog {
        &self.output
    }

    /// Resolved workspace, once planning has happened
    pub fn project_dir(&self) -> Option<&Path> {
        self.project_dir.get().map(PathBuf::as_path)
    }

    /// Full command sequence, once planning has happened
    pub fn commands(&self) -> Option<&[String]> {
        self.commands.get().map(Vec::as_slice)
    }

    /// Per-command timeout in effect for this build
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute the build. Blocks until every command has run, one failed,
    /// or the build was terminated. Never panics out.
    pub fn run(&self) {
        if !self.status.transition(BuildStatus::Waiting, BuildStatus::Running) {
            info!(build_id = self.job.id, status = %self.status(), "build terminated before start");
            self.completed.store(true, Ordering::SeqCst);
            return;
        }
        info!(
            build_id = self.job.id,
            project = %self.job.project_name,
            sha = %self.job.sha,
            "build started"
        );

        let failure = match panic::catch_unwind(AssertUnwindSafe(|| self.execute())) {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };

        if let Some(reason) = failure {
            warn!(build_id = self.job.id, %reason, "build could not run");
            self.output
                .narrate(format!("A runner exception occurred: {}", reason));
            self.status.transition(BuildStatus::Running, BuildStatus::Failed);
        }

        let status = self.status();
        match status {
            BuildStatus::Success => info!(build_id = self.job.id, "build completed"),
            BuildStatus::Aborted => info!(build_id = self.job.id, "build aborted"),
            _ => info!(build_id = self.job.id, %status, "build failed"),
        }
        self.completed.store(true, Ordering::SeqCst);
    }

    fn execute(&self) -> Result<(), BuildError> {
        self.output.push(format!(
            "Build {} for {} ({}) started at {}",
            self.job.id,
            self.job.project_name,
            self.job.sha,
            Utc::now().to_rfc3339()
        ));

        self.job.validate()?;
        let settings = self.settings.lookup(&self.job)?;
        let plan = self.workspace.prepare(&self.job, &settings)?;

        let mut commands = plan.commands;
        commands.extend(self.job.commands());
        let env = build_env(&self.job, &plan.project_dir);

        let project_dir = self.project_dir.get_or_init(|| plan.project_dir);
        let commands = self.commands.get_or_init(|| commands);

        for command in commands {
            if self.supervisor.is_cancelled() {
                break;
            }

            self.output.narrate(command.as_str());
            let spec = CommandSpec::new(command.as_str(), self.timeout)
                .with_working_dir(project_dir)
                .with_env(env.clone());

            if !self.supervisor.execute(&spec, &self.output) {
                self.settle(BuildStatus::Failed);
                return Ok(());
            }
        }

        self.settle(BuildStatus::Success);
        Ok(())
    }

    /// Final status from the worker's point of view. A cancellation request
    /// always wins over the command's own result.
    fn settle(&self, status: BuildStatus) {
        let status = if self.supervisor.is_cancelled() {
            BuildStatus::Aborted
        } else {
            status
        };
        self.status.transition(BuildStatus::Running, status);
    }

    /// Stop the build. Kills the running command's process tree; a build
    /// that already reached a terminal status is left untouched.
    pub fn terminate(&self) {
        if self.status.transition(BuildStatus::Waiting, BuildStatus::Aborted) {
            info!(build_id = self.job.id, "build aborted before start");
            return;
        }

        match self.supervisor.cancel() {
            Ok(killed) => {
                if self.status.transition(BuildStatus::Running, BuildStatus::Aborted) {
                    info!(build_id = self.job.id, killed, "build aborted");
                }
            }
            Err(e) => {
                warn!(build_id = self.job.id, error = %e, "failed to terminate build process");
                self.output
                    .narrate(format!("Exception caught when terminating build process: {}", e));
                self.status.transition(BuildStatus::Running, BuildStatus::Failed);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "build worker panicked".to_string()
    }
}
