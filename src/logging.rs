//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `CI_RUNNER_LOG` environment variable (a level such as "debug", or
//!    full filter directives such as "ci_runner=debug,runner_exec=trace")
//! 3. default to `info`
//!
//! Logs go to stderr so stdout stays free for command output such as
//! `ci-runner config`.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted when no `--log-level` is given
pub const ENV_LOG: &str = "CI_RUNNER_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Initialise the global subscriber.
///
/// A second call leaves the first subscriber in place.
pub fn init_logging(cli_level: Option<LogLevel>) {
    let filter = resolve_filter(cli_level, std::env::var(ENV_LOG).ok().as_deref());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .try_init();
}

fn resolve_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level.as_directive());
    }
    env_value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s.to_lowercase()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_level_wins() {
        let filter = resolve_filter(Some(LogLevel::Debug), Some("error"));
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_env_value_used_without_flag() {
        let filter = resolve_filter(None, Some(" WARN "));
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn test_defaults_to_info() {
        assert_eq!(resolve_filter(None, None).to_string(), "info");
        assert_eq!(resolve_filter(None, Some("")).to_string(), "info");
    }

    #[test]
    fn test_invalid_env_value_falls_back() {
        let filter = resolve_filter(None, Some("ci_runner=loud"));
        assert_eq!(filter.to_string(), "info");
    }
}
