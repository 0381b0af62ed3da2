//! Scheduler
//!
//! The runner's control loop. Each cycle either fetches a job (when no build
//! is owned) or pushes the owned build's state and trace and reacts to the
//! reply. At most one build is owned at a time and a new job is never
//! requested while one is.
//!
//! Builds run on their own worker thread, so a cycle never blocks on a
//! command; it only blocks on the coordinator while pushing.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use runner_protocol::JobDescriptor;
use tracing::{debug, error, info, warn};

use crate::build::{Build, BuildContext, BuildOptions};
use crate::client::{ClientConfig, CoordinatorClient, HttpTransport, PushOutcome, TransportError};
use crate::config::RunnerConfig;
use crate::workspace::WorkspaceManager;

/// What one scheduler cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No build owned and none available
    Idle,
    /// A new build was fetched and its worker started
    Started(u64),
    /// The owned build's state was pushed; the build is still owned
    Pushed { build_id: u64, outcome: PushOutcome },
    /// The owned build's final state was accepted and the build released
    Released(u64),
}

struct ActiveBuild {
    build: Arc<Build>,
    worker: Option<JoinHandle<()>>,
}

impl ActiveBuild {
    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(build_id = self.build.id(), "build worker panicked");
            }
        }
    }
}

/// Polls for work and drives the owned build
pub struct Scheduler {
    client: CoordinatorClient,
    context: BuildContext,
    interval: Duration,
    current: Option<ActiveBuild>,
}

impl Scheduler {
    pub fn new(client: CoordinatorClient, context: BuildContext, interval: Duration) -> Self {
        Self {
            client,
            context,
            interval,
            current: None,
        }
    }

    /// Scheduler talking HTTP to the configured coordinator.
    pub fn from_config(config: &RunnerConfig) -> Result<Self, TransportError> {
        let transport = HttpTransport::new(&config.url, config.request_timeout())?;
        let client = CoordinatorClient::with_config(
            Arc::new(transport),
            config.token.clone(),
            ClientConfig::from_config(config),
        );
        let root = config.root_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let context = BuildContext::new(
            Arc::new(config.project_rules()),
            WorkspaceManager::new(root),
            BuildOptions::from_config(config),
        );
        Ok(Self::new(client, context, config.poll_interval()))
    }

    /// The build currently owned, if any
    pub fn current_build(&self) -> Option<&Arc<Build>> {
        self.current.as_ref().map(|active| &active.build)
    }

    /// Run one cycle.
    pub fn tick(&mut self) -> TickOutcome {
        match self.current.take() {
            None => match self.client.fetch_job() {
                Some(job) => self.start_build(job),
                None => TickOutcome::Idle,
            },
            Some(active) => self.drive(active),
        }
    }

    fn start_build(&mut self, job: JobDescriptor) -> TickOutcome {
        let build_id = job.id;
        let build = Arc::new(self.context.build(job));
        let worker_build = Arc::clone(&build);

        let worker = thread::Builder::new()
            .name(format!("build-{}", build_id))
            .spawn(move || worker_build.run());

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(build_id, error = %e, "failed to start build worker");
                build
                    .output_log()
                    .narrate(format!("A runner exception occurred: cannot start build worker: {}", e));
                // Settles the build as aborted without running anything.
                build.terminate();
                build.run();
                None
            }
        };

        self.current = Some(ActiveBuild { build, worker });
        TickOutcome::Started(build_id)
    }

    fn drive(&mut self, mut active: ActiveBuild) -> TickOutcome {
        let build_id = active.build.id();
        // Completion first: once it is set, the status read below is final.
        let completed = active.build.is_completed();
        let state = active.build.wire_state();
        let trace = active.build.output();

        let outcome = self.client.push_status(build_id, state, &trace);
        match outcome {
            PushOutcome::Success | PushOutcome::Aborted if completed => {
                active.join();
                info!(build_id, %state, "build released");
                return TickOutcome::Released(build_id);
            }
            PushOutcome::Success => {}
            PushOutcome::Aborted => {
                warn!(build_id, "build aborted by coordinator, terminating");
                active.build.terminate();
            }
            PushOutcome::Failed => {
                warn!(build_id, "status push failed, retrying next cycle");
            }
        }

        self.current = Some(active);
        TickOutcome::Pushed { build_id, outcome }
    }

    /// Terminate and join the owned build, then make one best-effort push
    /// of its final state.
    fn shutdown(&mut self) {
        if let Some(mut active) = self.current.take() {
            let build_id = active.build.id();
            info!(build_id, "terminating build for shutdown");
            active.build.terminate();
            active.join();

            let outcome =
                self.client
                    .push_status(build_id, active.build.wire_state(), &active.build.output());
            debug!(build_id, ?outcome, "final status push");
        }
    }

    /// Start the loop on its own thread.
    pub fn start(self) -> std::io::Result<SchedulerHandle> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || self.run_loop(stop_rx))?;
        Ok(SchedulerHandle {
            stop_tx,
            thread: Some(thread),
        })
    }

    fn run_loop(mut self, stop: Receiver<()>) {
        info!(interval_ms = self.interval.as_millis() as u64, "scheduler started");
        loop {
            if panic::catch_unwind(AssertUnwindSafe(|| self.tick())).is_err() {
                error!("scheduler cycle panicked");
            }
            match stop.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.shutdown();
        info!("scheduler stopped");
    }
}

/// Control handle for a running scheduler loop
pub struct SchedulerHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the loop. Returns once any owned build has been terminated, its
    /// worker joined and the loop thread has exited.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("scheduler thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}
