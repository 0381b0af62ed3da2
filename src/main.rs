//! CI runner CLI
//!
//! Entry point for the `ci-runner` command-line tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use ci_runner::client::{CoordinatorClient, HttpTransport};
use ci_runner::config::{EffectiveConfig, RunnerConfig, DEFAULT_CONFIG_FILE};
use ci_runner::logging::{init_logging, LogLevel};
use ci_runner::scheduler::Scheduler;
use ci_runner::signal::{SignalHandler, EXIT_CODE_SIGNALLED};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::info;

#[derive(Parser)]
#[command(name = "ci-runner")]
#[command(about = "Build-execution agent for a CI coordinator", version)]
struct Cli {
    /// Log level (overrides CI_RUNNER_LOG)
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the coordinator and run builds until interrupted
    Run {
        /// Path to config file (default: ./runner.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Coordinator URL (overrides config and CI_RUNNER_URL)
        #[arg(long)]
        url: Option<String>,

        /// Runner token (overrides config and CI_RUNNER_TOKEN)
        #[arg(long)]
        token: Option<String>,
    },

    /// Register this runner and save its credentials
    Register {
        /// Coordinator URL
        #[arg(long)]
        url: String,

        /// Registration token issued by the coordinator
        #[arg(long)]
        registration_token: String,

        /// File holding the public key to register with
        #[arg(long)]
        public_key: Option<PathBuf>,

        /// Path to config file to write (default: ./runner.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration (token redacted)
    Config {
        /// Path to config file (default: ./runner.toml)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let code = match cli.command {
        Commands::Run { config, url, token } => run_runner(config, url, token),
        Commands::Register {
            url,
            registration_token,
            public_key,
            config,
        } => run_register(url, registration_token, public_key, config),
        Commands::Config { config } => run_config(config),
    };
    process::exit(code);
}

fn config_path(config: Option<PathBuf>) -> PathBuf {
    config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn cli_overrides(url: Option<String>, token: Option<String>) -> Option<Value> {
    let mut map = Map::new();
    if let Some(url) = url {
        map.insert("url".to_string(), json!(url));
    }
    if let Some(token) = token {
        map.insert("token".to_string(), json!(token));
    }
    (!map.is_empty()).then_some(Value::Object(map))
}

fn load_config(path: &Path, cli: Option<Value>) -> Option<EffectiveConfig> {
    match EffectiveConfig::build(Some(path), EffectiveConfig::env_overrides(), cli) {
        Ok(effective) => Some(effective),
        Err(e) => {
            eprintln!("Error: {}", e);
            None
        }
    }
}

fn run_runner(config: Option<PathBuf>, url: Option<String>, token: Option<String>) -> i32 {
    let path = config_path(config);
    let Some(effective) = load_config(&path, cli_overrides(url, token)) else {
        return 1;
    };
    let config = effective.config;

    if let Err(e) = config.require_credentials() {
        eprintln!("Error: {}", e);
        eprintln!("Register the runner first with `ci-runner register`.");
        return 1;
    }

    let signals = SignalHandler::new();
    if let Err(e) = signals.install() {
        eprintln!("Error: failed to install signal handler: {}", e);
        return 1;
    }

    let scheduler = match Scheduler::from_config(&config) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    info!(
        url = %config.url,
        projects_root = %config.projects_root().display(),
        "runner started"
    );
    let handle = match scheduler.start() {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: failed to start scheduler: {}", e);
            return 1;
        }
    };

    signals.wait_for_shutdown();
    info!("shutdown requested");
    handle.stop();
    info!("runner stopped");
    EXIT_CODE_SIGNALLED
}

fn run_register(
    url: String,
    registration_token: String,
    public_key: Option<PathBuf>,
    config: Option<PathBuf>,
) -> i32 {
    let path = config_path(config);

    let public_key = match public_key {
        Some(key_path) => match fs::read_to_string(&key_path) {
            Ok(key) => key.trim().to_string(),
            Err(e) => {
                eprintln!("Error: cannot read public key {}: {}", key_path.display(), e);
                return 1;
            }
        },
        None => String::new(),
    };

    let Some(effective) = load_config(&path, cli_overrides(Some(url), None)) else {
        return 1;
    };
    let config = effective.config;

    let transport = match HttpTransport::new(&config.url, config.request_timeout()) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let token = match CoordinatorClient::try_register(&transport, &registration_token, &public_key) {
        Ok(token) => token,
        Err(e) => {
            eprintln!("Error: registration failed: {}", e);
            return 1;
        }
    };

    if let Err(e) = RunnerConfig::save_credentials(&path, &config.url, &token) {
        eprintln!("Error: {}", e);
        return 1;
    }

    println!("Runner registered, credentials saved to {}", path.display());
    0
}

fn run_config(config: Option<PathBuf>) -> i32 {
    let path = config_path(config);
    let Some(effective) = load_config(&path, None) else {
        return 1;
    };

    match effective.to_redacted_json() {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}
