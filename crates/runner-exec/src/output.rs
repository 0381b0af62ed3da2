//! Build output buffer shared between the command runner and readers.

use std::sync::{Arc, Mutex, MutexGuard};

/// Append-only, thread-safe log of output lines.
///
/// Clones share the same buffer. Writers append whole lines; readers take
/// snapshots without draining anything.
#[derive(Debug, Clone, Default)]
pub struct OutputLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one line.
    pub fn push(&self, line: impl Into<String>) {
        self.lock().push(line.into());
    }

    /// Append an empty separator line.
    pub fn push_blank(&self) {
        self.push(String::new());
    }

    /// Append a message framed by blank lines so it stands out in the trace.
    pub fn narrate(&self, message: impl Into<String>) {
        let mut lines = self.lock();
        lines.push(String::new());
        lines.push(message.into());
        lines.push(String::new());
    }

    /// Number of buffered lines, blanks included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Current contents joined with `\n`, leading blank lines skipped.
    pub fn snapshot(&self) -> String {
        let lines = self.lock();
        let start = lines
            .iter()
            .position(|line| !line.trim().is_empty())
            .unwrap_or(lines.len());
        lines[start..].join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_snapshot_skips_leading_blanks() {
        let log = OutputLog::new();
        log.push_blank();
        log.push("  ");
        log.push("ls");
        log.push_blank();
        log.push("Cargo.toml");

        assert_eq!(log.snapshot(), "ls\n\nCargo.toml");
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let log = OutputLog::new();
        log.narrate("make");
        log.push("ok");

        let first = log.snapshot();
        let second = log.snapshot();
        assert_eq!(first, second);
        assert_eq!(log.len(), 4, "snapshot must not drain the buffer");
    }

    #[test]
    fn test_empty_log() {
        let log = OutputLog::new();
        assert!(log.is_empty());
        assert_eq!(log.snapshot(), "");
        log.push_blank();
        assert_eq!(log.snapshot(), "");
    }

    #[test]
    fn test_clones_share_buffer() {
        let log = OutputLog::new();
        let writer = log.clone();
        writer.push("from clone");
        assert_eq!(log.snapshot(), "from clone");
    }

    #[test]
    fn test_concurrent_append_and_read() {
        let log = OutputLog::new();
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let log = log.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        log.push(format!("w{}-{}", w, i));
                    }
                })
            })
            .collect();

        for _ in 0..50 {
            let _ = log.snapshot();
        }
        for handle in writers {
            handle.join().unwrap();
        }

        assert_eq!(log.len(), 1000);
        // Lines from one writer keep their relative order.
        let snapshot = log.snapshot();
        let w0: Vec<_> = snapshot.lines().filter(|l| l.starts_with("w0-")).collect();
        let expected: Vec<_> = (0..250).map(|i| format!("w0-{}", i)).collect();
        assert_eq!(w0, expected);
    }
}
