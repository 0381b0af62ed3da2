//! Runner configuration
//!
//! Layered merge of built-in defaults, `runner.toml`, environment and CLI
//! flags into a [`RunnerConfig`], plus the per-project settings rules
//! consulted for every build.

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use effective::{
    ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, RunnerConfig, DEFAULT_CONFIG_FILE,
    ENV_TOKEN, ENV_URL,
};
pub use merge::{deep_merge, merge_layers};
pub use settings::{
    ProjectRule, ProjectRules, ProjectSettings, ProjectSettingsSource, SettingsError,
};
