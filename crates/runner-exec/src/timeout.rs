//! Timeout enforcement for a single command.
//!
//! The enforcer does not kill anything itself; it only reports whether
//! the wall-clock budget is spent. The supervisor acts on the result.

use std::time::{Duration, Instant};

/// Timeout check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStatus {
    /// Still within budget
    Ok,
    /// Wall-clock limit exceeded
    Expired,
}

impl TimeoutStatus {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TimeoutStatus::Expired)
    }
}

/// Tracks elapsed time against a fixed limit.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutEnforcer {
    limit: Duration,
    start_time: Instant,
}

impl TimeoutEnforcer {
    /// Start the clock now.
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            start_time: Instant::now(),
        }
    }

    pub fn check(&self) -> TimeoutStatus {
        if self.start_time.elapsed() >= self.limit {
            TimeoutStatus::Expired
        } else {
            TimeoutStatus::Ok
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Time left before the limit; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.start_time.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_within_limit() {
        let enforcer = TimeoutEnforcer::new(Duration::from_secs(60));
        assert_eq!(enforcer.check(), TimeoutStatus::Ok);
        assert!(!enforcer.check().is_timeout());
        assert!(enforcer.remaining() > Duration::from_secs(59));
    }

    #[test]
    fn test_expires() {
        let enforcer = TimeoutEnforcer::new(Duration::from_millis(20));
        thread::sleep(Duration::from_millis(40));
        assert_eq!(enforcer.check(), TimeoutStatus::Expired);
        assert_eq!(enforcer.remaining(), Duration::ZERO);
        assert!(enforcer.elapsed() >= enforcer.limit());
    }

    #[test]
    fn test_zero_limit_expires_immediately() {
        let enforcer = TimeoutEnforcer::new(Duration::ZERO);
        assert!(enforcer.check().is_timeout());
    }
}
