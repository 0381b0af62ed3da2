//! Process tree enumeration and termination.
//!
//! The kill algorithm only needs two capabilities from the OS: list the
//! direct children of a pid and kill a pid. [`ProcessTable`] exposes
//! those, [`kill_tree`] walks them depth-first, and
//! [`SystemProcessTable`] implements them for the host platform.
//!
//! A process that starts a new session, or whose parent exits, is
//! reparented and drops out of the tree below the command. The
//! [`DescendantTracker`] remembers every descendant seen while the command
//! was alive so those can still be killed afterwards.

use std::collections::{BTreeMap, HashSet};
use std::io;

/// OS process-table capability used to tear down process trees.
pub trait ProcessTable: Send + Sync {
    /// Direct children of `pid`. A pid that no longer exists has no children.
    fn children(&self, pid: u32) -> io::Result<Vec<u32>>;

    /// Forcefully kill `pid`. Killing a process that already exited is not an error.
    fn kill(&self, pid: u32) -> io::Result<()>;

    /// Ask `pid` to terminate.
    fn terminate(&self, pid: u32) -> io::Result<()> {
        let _ = pid;
        Ok(())
    }

    /// Opaque marker of when `pid` started, `None` when unknown or gone.
    ///
    /// A recycled pid yields a different marker.
    fn start_time(&self, pid: u32) -> Option<String> {
        let _ = pid;
        None
    }

    /// Ask every member of process group `pgid` to terminate.
    fn terminate_group(&self, pgid: u32) -> io::Result<()> {
        let _ = pgid;
        Ok(())
    }

    /// Forcefully kill every member of process group `pgid`.
    fn kill_group(&self, pgid: u32) -> io::Result<()> {
        let _ = pgid;
        Ok(())
    }
}

/// Kill `pid` and all of its descendants, children before parents.
///
/// Keeps going after individual failures and returns the first one.
pub fn kill_tree(table: &dyn ProcessTable, pid: u32) -> io::Result<()> {
    let mut visited = HashSet::new();
    let mut first_error = None;
    kill_subtree(table, pid, &mut visited, &mut first_error);
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn kill_subtree(
    table: &dyn ProcessTable,
    pid: u32,
    visited: &mut HashSet<u32>,
    first_error: &mut Option<io::Error>,
) {
    // pid 0 and 1 are never ours to kill
    if pid <= 1 || !visited.insert(pid) {
        return;
    }

    match table.children(pid) {
        Ok(children) => {
            for child in children {
                kill_subtree(table, child, visited, first_error);
            }
        }
        Err(e) => {
            first_error.get_or_insert(e);
        }
    }

    if let Err(e) = table.kill(pid) {
        first_error.get_or_insert(e);
    }
}

/// Every descendant of `pid`, parents before children; `pid` itself excluded.
pub fn descendants(table: &dyn ProcessTable, pid: u32) -> io::Result<Vec<u32>> {
    let mut visited = HashSet::from([pid]);
    let mut found = Vec::new();
    let mut pending = table.children(pid)?;
    pending.reverse();

    while let Some(next) = pending.pop() {
        if next <= 1 || !visited.insert(next) {
            continue;
        }
        found.push(next);
        let mut children = table.children(next)?;
        children.reverse();
        pending.extend(children);
    }
    Ok(found)
}

/// Descendants observed while a command ran.
#[derive(Debug, Default)]
pub struct DescendantTracker {
    seen: BTreeMap<u32, Option<String>>,
}

impl DescendantTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current descendants of `pid`.
    pub fn refresh(&mut self, table: &dyn ProcessTable, pid: u32) -> io::Result<()> {
        for child in descendants(table, pid)? {
            self.seen
                .entry(child)
                .or_insert_with(|| table.start_time(child));
        }
        Ok(())
    }

    pub fn pids(&self) -> Vec<u32> {
        self.seen.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Ask every remembered descendant that is still running to terminate.
    pub fn terminate_all(&self, table: &dyn ProcessTable) {
        for pid in self.still_running(table) {
            let _ = table.terminate(pid);
        }
    }

    /// Kill every remembered descendant that is still running, with
    /// whatever it spawned since.
    ///
    /// Keeps going after individual failures and returns the first one.
    pub fn kill_all(&self, table: &dyn ProcessTable) -> io::Result<()> {
        let mut first_error = None;
        for pid in self.still_running(table) {
            if let Err(e) = kill_tree(table, pid) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Remembered pids that still name the process that was seen.
    fn still_running(&self, table: &dyn ProcessTable) -> Vec<u32> {
        self.seen
            .iter()
            .filter(|(pid, marker)| match marker {
                Some(marker) => table.start_time(**pid).as_ref() == Some(marker),
                None => true,
            })
            .map(|(pid, _)| *pid)
            .collect()
    }
}

/// Process table backed by the host OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
impl SystemProcessTable {
    fn list_children(pid: u32) -> io::Result<Vec<u32>> {
        let mut children = Vec::new();
        for entry in std::fs::read_dir("/proc")? {
            let Ok(entry) = entry else { continue };
            let Some(candidate) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            // The process may exit between listing and reading.
            let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            if parse_stat_ppid(&stat) == Some(pid) {
                children.push(candidate);
            }
        }
        children.sort_unstable();
        Ok(children)
    }
}

#[cfg(target_os = "linux")]
impl SystemProcessTable {
    fn read_start_time(pid: u32) -> Option<String> {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        parse_stat_start_time(&stat)
    }
}

/// Start time in clock ticks since boot from `/proc/<pid>/stat`.
///
/// Zombies report `None`: they are already dead.
#[cfg(any(target_os = "linux", test))]
fn parse_stat_start_time(stat: &str) -> Option<String> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    if fields.next()? == "Z" {
        return None;
    }
    // starttime is field 22; the state field above is field 3
    fields.nth(18).map(str::to_string)
}

/// Parent pid from the contents of `/proc/<pid>/stat`.
///
/// The command name is wrapped in parentheses and may itself contain
/// spaces or parentheses, so fields are read after the last `)`.
#[cfg(any(target_os = "linux", test))]
fn parse_stat_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

#[cfg(all(unix, not(target_os = "linux")))]
impl SystemProcessTable {
    fn list_children(pid: u32) -> io::Result<Vec<u32>> {
        let output = std::process::Command::new("pgrep")
            .arg("-P")
            .arg(pid.to_string())
            .output()?;
        // pgrep exits 1 when nothing matched
        if !output.status.success() && output.status.code() != Some(1) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("pgrep exited with {}", output.status),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }

    fn read_start_time(pid: u32) -> Option<String> {
        let output = std::process::Command::new("ps")
            .args(["-o", "lstart=", "-p"])
            .arg(pid.to_string())
            .output()
            .ok()?;
        let started = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (output.status.success() && !started.is_empty()).then_some(started)
    }
}

#[cfg(unix)]
mod unix_signals {
    use std::io;

    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::{self, Pid};

    fn ignore_missing(result: nix::Result<()>) -> io::Result<()> {
        match result {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    pub(super) fn kill(pid: u32, sig: Signal) -> io::Result<()> {
        ignore_missing(signal::kill(Pid::from_raw(pid as i32), sig))
    }

    pub(super) fn kill_group(pgid: u32, sig: Signal) -> io::Result<()> {
        // Never signal the runner's own group.
        if pgid <= 1 || Pid::from_raw(pgid as i32) == unistd::getpgrp() {
            return Ok(());
        }
        ignore_missing(signal::killpg(Pid::from_raw(pgid as i32), sig))
    }
}

#[cfg(unix)]
impl ProcessTable for SystemProcessTable {
    fn children(&self, pid: u32) -> io::Result<Vec<u32>> {
        Self::list_children(pid)
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        unix_signals::kill(pid, nix::sys::signal::Signal::SIGKILL)
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        unix_signals::kill(pid, nix::sys::signal::Signal::SIGTERM)
    }

    fn start_time(&self, pid: u32) -> Option<String> {
        Self::read_start_time(pid)
    }

    fn terminate_group(&self, pgid: u32) -> io::Result<()> {
        unix_signals::kill_group(pgid, nix::sys::signal::Signal::SIGTERM)
    }

    fn kill_group(&self, pgid: u32) -> io::Result<()> {
        unix_signals::kill_group(pgid, nix::sys::signal::Signal::SIGKILL)
    }
}

#[cfg(windows)]
impl ProcessTable for SystemProcessTable {
    fn children(&self, pid: u32) -> io::Result<Vec<u32>> {
        let output = std::process::Command::new("wmic")
            .args(["process", "where"])
            .arg(format!("(ParentProcessId={})", pid))
            .args(["get", "ProcessId"])
            .output()?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }

    fn kill(&self, pid: u32) -> io::Result<()> {
        let status = std::process::Command::new("taskkill")
            .args(["/F", "/PID"])
            .arg(pid.to_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()?;
        // 128: no such process
        if status.success() || status.code() == Some(128) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("taskkill exited with {}", status),
            ))
        }
    }

    fn start_time(&self, pid: u32) -> Option<String> {
        let output = std::process::Command::new("wmic")
            .args(["process", "where"])
            .arg(format!("(ProcessId={})", pid))
            .args(["get", "CreationDate"])
            .output()
            .ok()?;
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with(|c: char| c.is_ascii_digit()))
            .map(str::to_string)
    }
}
