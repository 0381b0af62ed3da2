//! Process supervisor for build commands.
//!
//! Runs one shell command at a time with:
//! - stdout/stderr captured line by line into an [`OutputLog`]
//! - a wall-clock timeout
//! - cancellation from another thread
//! - teardown of the whole process tree on every exit path
//!
//! Commands are started in their own process group (unix). Descendants are
//! also tracked by parentage while the command runs, which catches processes
//! that leave the group with `setsid` and covers platforms without groups.
//! Whatever is left of both is killed on every exit path, so background jobs
//! never outlive the build step.
//!
//! Ordering between stdout and stderr lines is arrival order as seen by two
//! independent reader threads. Lines from one stream keep their order; the
//! interleaving of the two streams is best effort.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::output::OutputLog;
use crate::process_tree::{kill_tree, DescendantTracker, ProcessTable, SystemProcessTable};
use crate::timeout::TimeoutEnforcer;

/// Errors from supervisor operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to start command: {0}")]
    Spawn(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to terminate process tree of pid {pid}: {source}")]
    Terminate {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

/// Result type for supervisor operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// One command to run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Command line handed to the shell as a single string.
    pub command: String,
    /// Working directory; ignored when it does not exist yet.
    pub working_dir: Option<PathBuf>,
    /// Variables set on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Wall-clock limit.
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            env: BTreeMap::new(),
            timeout,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// How a supervised command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The command exited on its own; `None` when killed by a signal.
    Exited(Option<i32>),
    /// The command ran past its timeout and was killed.
    TimedOut,
    /// The command was stopped by [`ProcessSupervisor::cancel`].
    Cancelled,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExecOutcome::Exited(Some(0)))
    }
}

/// Spawns commands and guarantees their process trees are gone afterwards.
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    table: Arc<dyn ProcessTable>,
    cancelled: AtomicBool,
    /// Pid of the running command. Held locked while the command is being
    /// reaped so a concurrent cancel never signals a recycled pid.
    active: Mutex<Option<u32>>,
}

impl ProcessSupervisor {
    /// Supervisor using the host process table.
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_table(config, Arc::new(SystemProcessTable::new()))
    }

    pub fn with_table(config: SupervisorConfig, table: Arc<dyn ProcessTable>) -> Self {
        Self {
            config,
            table,
            cancelled: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<u32>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Pid of the command currently running, if any.
    pub fn active_pid(&self) -> Option<u32> {
        *self.lock_active()
    }

    /// Run a command and report whether it exited with code 0.
    ///
    /// Never fails: spawn errors and other faults are written to `log`
    /// and reported as `false`.
    pub fn execute(&self, spec: &CommandSpec, log: &OutputLog) -> bool {
        match self.run(spec, log) {
            Ok(outcome) => {
                debug!(command = %spec.command, ?outcome, "command finished");
                outcome.success()
            }
            Err(e) => {
                warn!(command = %spec.command, error = %e, "command could not be run");
                log.narrate(format!("Failed to run command: {}", e));
                false
            }
        }
    }

    /// Run a command to completion, timeout or cancellation.
    pub fn run(&self, spec: &CommandSpec, log: &OutputLog) -> SupervisorResult<ExecOutcome> {
        if self.is_cancelled() {
            return Ok(ExecOutcome::Cancelled);
        }

        let mut child = self
            .shell_command(spec)
            .spawn()
            .map_err(SupervisorError::Spawn)?;
        let pid = child.id();
        *self.lock_active() = Some(pid);
        debug!(pid, command = %spec.command, "command started");

        let drain = OutputDrain::start(&mut child, log);
        let enforcer = TimeoutEnforcer::new(spec.timeout);
        let mut tracker = DescendantTracker::new();

        let waited = self.wait(&mut child, pid, &enforcer, &mut tracker, log);
        self.sweep(pid, &tracker);
        drain.finish(self.config.drain_timeout, log);

        waited
    }

    /// Kill everything the command left behind once it has been reaped.
    fn sweep(&self, pid: u32, tracker: &DescendantTracker) {
        if let Err(e) = self.table.kill_group(pid) {
            warn!(pid, error = %e, "failed to kill leftover process group");
        }
        if !tracker.is_empty() {
            debug!(pid, descendants = ?tracker.pids(), "killing leftover descendants");
        }
        if let Err(e) = tracker.kill_all(self.table.as_ref()) {
            warn!(pid, error = %e, "failed to kill leftover descendants");
        }
    }

    fn track(&self, pid: u32, tracker: &mut DescendantTracker) {
        if let Err(e) = tracker.refresh(self.table.as_ref(), pid) {
            debug!(pid, error = %e, "cannot list descendants");
        }
    }

    fn wait(
        &self,
        child: &mut Child,
        pid: u32,
        enforcer: &TimeoutEnforcer,
        tracker: &mut DescendantTracker,
        log: &OutputLog,
    ) -> SupervisorResult<ExecOutcome> {
        loop {
            if self.is_cancelled() {
                self.stop(child, pid, tracker)?;
                return Ok(ExecOutcome::Cancelled);
            }

            if enforcer.check().is_timeout() {
                info!(pid, timeout_secs = enforcer.limit().as_secs(), "command timed out");
                log.narrate(format!(
                    "Command timed out after {} seconds",
                    enforcer.limit().as_secs()
                ));
                self.stop(child, pid, tracker)?;
                return Ok(ExecOutcome::TimedOut);
            }

            // Unreaped, so `pid` cannot have been recycled yet.
            self.track(pid, tracker);

            {
                let mut active = self.lock_active();
                match child.try_wait() {
                    Ok(Some(status)) => {
                        *active = None;
                        return Ok(ExecOutcome::Exited(status.code()));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        drop(active);
                        self.stop(child, pid, tracker)?;
                        return Err(e.into());
                    }
                }
            }

            let nap = enforcer.remaining().max(Duration::from_millis(1));
            thread::sleep(self.config.poll_interval.min(nap));
        }
    }

    /// Terminate a running command: SIGTERM to its group and every known
    /// descendant, then after the grace period kill whatever is left.
    fn stop(
        &self,
        child: &mut Child,
        pid: u32,
        tracker: &mut DescendantTracker,
    ) -> SupervisorResult<()> {
        if !self.reap(child)? {
            self.track(pid, tracker);
        }
        if let Err(e) = self.table.terminate_group(pid) {
            debug!(pid, error = %e, "SIGTERM to process group failed");
        }
        tracker.terminate_all(self.table.as_ref());

        let grace_start = Instant::now();
        while grace_start.elapsed() < self.config.termination_grace {
            if self.reap(child)? {
                return Ok(());
            }
            thread::sleep(self.config.poll_interval);
        }

        {
            let _active = self.lock_active();
            if child.try_wait()?.is_none() {
                self.track(pid, tracker);
                kill_tree(self.table.as_ref(), pid)
                    .map_err(|source| SupervisorError::Terminate { pid, source })?;
            }
        }
        self.table
            .kill_group(pid)
            .map_err(|source| SupervisorError::Terminate { pid, source })?;

        let mut active = self.lock_active();
        child.wait()?;
        *active = None;
        Ok(())
    }

    fn reap(&self, child: &mut Child) -> SupervisorResult<bool> {
        let mut active = self.lock_active();
        match child.try_wait()? {
            Some(_) => {
                *active = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop the running command, if any, and refuse to start new ones.
    ///
    /// Returns `true` when a live process tree was killed. Safe to call from
    /// any thread while [`run`](Self::run) is blocked on the command.
    pub fn cancel(&self) -> SupervisorResult<bool> {
        self.cancelled.store(true, Ordering::SeqCst);

        let active = self.lock_active();
        let Some(pid) = *active else {
            return Ok(false);
        };

        info!(pid, "cancelling running command");
        kill_tree(self.table.as_ref(), pid)
            .map_err(|source| SupervisorError::Terminate { pid, source })?;
        self.table
            .kill_group(pid)
            .map_err(|source| SupervisorError::Terminate { pid, source })?;
        Ok(true)
    }

    fn shell_command(&self, spec: &CommandSpec) -> Command {
        let (shell, flag) = &self.config.shell;
        let mut command = Command::new(shell);

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.raw_arg(flag).raw_arg(format!("\"{}\"", spec.command));
        }
        #[cfg(not(windows))]
        {
            command.arg(flag).arg(&spec.command);
        }

        if let Some(dir) = spec.working_dir.as_ref().filter(|dir| dir.is_dir()) {
            command.current_dir(dir);
        }

        command
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command
    }
}

/// Reader threads copying a child's stdout/stderr into the output log.
struct OutputDrain {
    done: Receiver<()>,
    handles: Vec<JoinHandle<()>>,
}

impl OutputDrain {
    fn start(child: &mut Child, log: &OutputLog) -> Self {
        let (tx, done) = mpsc::channel();
        let mut handles = Vec::new();

        if let Some(stdout) = child.stdout.take() {
            handles.push(spawn_reader(stdout, log.clone(), tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            handles.push(spawn_reader(stderr, log.clone(), tx));
        }

        Self { done, handles }
    }

    /// Wait for both streams to close. A descendant that escaped the process
    /// group may keep a pipe open forever; after `timeout` the readers are
    /// left detached.
    fn finish(self, timeout: Duration, log: &OutputLog) {
        let deadline = Instant::now() + timeout;
        for _ in 0..self.handles.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done.recv_timeout(remaining) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    warn!("output stream still open after command exit; detaching reader");
                    log.narrate("Output capture stopped: a background process still holds the output stream");
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn spawn_reader<R>(stream: R, log: OutputLog, done: mpsc::Sender<()>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']);
                    if !line.is_empty() {
                        log.push(line);
                    }
                }
            }
        }
        let _ = done.send(());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Table that records calls and kills nothing.
    #[derive(Default)]
    struct RecordingTable {
        calls: Mutex<Vec<String>>,
    }

    impl ProcessTable for RecordingTable {
        fn children(&self, _pid: u32) -> io::Result<Vec<u32>> {
            Ok(Vec::new())
        }

        fn kill(&self, pid: u32) -> io::Result<()> {
            self.calls.lock().unwrap().push(format!("kill {}", pid));
            Ok(())
        }

        fn kill_group(&self, pgid: u32) -> io::Result<()> {
            self.calls.lock().unwrap().push(format!("kill_group {}", pgid));
            Ok(())
        }
    }

    #[test]
    fn test_outcome_success() {
        assert!(ExecOutcome::Exited(Some(0)).success());
        assert!(!ExecOutcome::Exited(Some(1)).success());
        assert!(!ExecOutcome::Exited(None).success());
        assert!(!ExecOutcome::TimedOut.success());
        assert!(!ExecOutcome::Cancelled.success());
    }

    #[test]
    fn test_cancel_without_running_command() {
        let table = Arc::new(RecordingTable::default());
        let supervisor = ProcessSupervisor::with_table(SupervisorConfig::default(), table.clone());

        assert!(!supervisor.cancel().unwrap());
        assert!(supervisor.is_cancelled());
        assert!(table.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_supervisor_runs_nothing() {
        let supervisor = ProcessSupervisor::new(SupervisorConfig::default());
        supervisor.cancel().unwrap();

        let log = OutputLog::new();
        let outcome = supervisor
            .run(&CommandSpec::new("echo never", Duration::from_secs(5)), &log)
            .unwrap();
        assert_eq!(outcome, ExecOutcome::Cancelled);
        assert!(log.is_empty());
    }

    #[test]
    fn test_spawn_failure_is_logged_not_raised() {
        let mut config = SupervisorConfig::default();
        config.shell = ("/nonexistent/shell-for-test".to_string(), "-c".to_string());
        let supervisor = ProcessSupervisor::new(config);
        let log = OutputLog::new();

        let ok = supervisor.execute(&CommandSpec::new("true", Duration::from_secs(5)), &log);
        assert!(!ok);
        assert!(log.snapshot().starts_with("Failed to run command: failed to start command"));
        assert_eq!(supervisor.active_pid(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_exited_command_group_is_swept() {
        let table = Arc::new(RecordingTable::default());
        let supervisor = ProcessSupervisor::with_table(SupervisorConfig::default(), table.clone());
        let log = OutputLog::new();

        let outcome = supervisor
            .run(&CommandSpec::new("exit 3", Duration::from_secs(10)), &log)
            .unwrap();
        assert_eq!(outcome, ExecOutcome::Exited(Some(3)));

        let calls = table.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("kill_group "));
    }

    /// Table reporting one fake descendant below any real pid.
    #[derive(Default)]
    struct LeftoverTable {
        recording: RecordingTable,
    }

    const LEFTOVER: u32 = 4_000_000;

    impl ProcessTable for LeftoverTable {
        fn children(&self, pid: u32) -> io::Result<Vec<u32>> {
            Ok(if pid == LEFTOVER { Vec::new() } else { vec![LEFTOVER] })
        }

        fn kill(&self, pid: u32) -> io::Result<()> {
            self.recording.kill(pid)
        }

        fn kill_group(&self, pgid: u32) -> io::Result<()> {
            self.recording.kill_group(pgid)
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_descendants_seen_while_running_are_killed_after_exit() {
        let table = Arc::new(LeftoverTable::default());
        let supervisor = ProcessSupervisor::with_table(SupervisorConfig::default(), table.clone());
        let log = OutputLog::new();

        let outcome = supervisor
            .run(&CommandSpec::new("exit 0", Duration::from_secs(10)), &log)
            .unwrap();
        assert_eq!(outcome, ExecOutcome::Exited(Some(0)));

        let calls = table.recording.calls.lock().unwrap().clone();
        assert!(calls[0].starts_with("kill_group "), "got: {:?}", calls);
        assert_eq!(calls[1..], [format!("kill {}", LEFTOVER)]);
    }

    #[cfg(unix)]
    #[test]
    fn test_env_overlay_and_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let supervisor = ProcessSupervisor::new(SupervisorConfig::default());
        let log = OutputLog::new();
        let env = BTreeMap::from([
            ("CI_SERVER".to_string(), "yes".to_string()),
            ("RUBYOPT".to_string(), String::new()),
        ]);

        let spec = CommandSpec::new(
            "echo \"server=$CI_SERVER rubyopt=[$RUBYOPT]\"; pwd",
            Duration::from_secs(10),
        )
        .with_working_dir(dir.path())
        .with_env(env);

        assert!(supervisor.execute(&spec, &log));
        let out = log.snapshot();
        assert!(out.contains("server=yes rubyopt=[]"), "got: {}", out);
        let canonical = dir.path().canonicalize().unwrap();
        assert!(out.contains(canonical.to_str().unwrap()), "got: {}", out);
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_working_dir_falls_back() {
        let supervisor = ProcessSupervisor::new(SupervisorConfig::default());
        let log = OutputLog::new();
        let spec = CommandSpec::new("echo fallback", Duration::from_secs(10))
            .with_working_dir("/nonexistent/workspace/for/test");
        assert!(supervisor.execute(&spec, &log));
        assert_eq!(log.snapshot(), "fallback");
    }
}
