//! Effective runner configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Config file (`runner.toml`)
//! 3. Environment (`CI_RUNNER_URL`, `CI_RUNNER_TOKEN`)
//! 4. CLI flags

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::settings::{ProjectRule, ProjectRules};

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "runner.toml";

/// Environment variable overriding the coordinator URL
pub const ENV_URL: &str = "CI_RUNNER_URL";

/// Environment variable overriding the runner token
pub const ENV_TOKEN: &str = "CI_RUNNER_TOKEN";

/// Keys that contain secrets and should be redacted
const SECRET_KEYS: &[&str] = &["token", "password", "secret"];

/// Origin of a configuration layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Env,
    Cli,
}

/// A contributing config layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Typed runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Coordinator base URL
    pub url: String,

    /// Runner token issued at registration
    pub token: String,

    /// Agent root; workspaces live under `<root_dir>/projects`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,

    pub poll_interval_secs: u64,
    pub push_attempts: u32,
    pub push_retry_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub default_timeout_secs: u64,
    pub termination_grace_secs: u64,

    /// Per-project settings rules, in file order
    #[serde(default, rename = "project")]
    pub projects: Vec<ProjectRule>,
}

impl RunnerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn push_retry_delay(&self) -> Duration {
        Duration::from_millis(self.push_retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_secs)
    }

    /// Directory holding the default per-project workspaces
    pub fn projects_root(&self) -> PathBuf {
        self.root_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("projects")
    }

    pub fn project_rules(&self) -> ProjectRules {
        ProjectRules::new(self.projects.clone())
    }

    /// Check that the runner can talk to a coordinator.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "url is not set (config file, {} or --url)",
                ENV_URL
            )));
        }
        if self.token.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "token is not set (run `ci-runner register`, set {} or pass --token)",
                ENV_TOKEN
            )));
        }
        Ok(())
    }

    /// Write `url` and `token` into a config file, keeping every other key.
    pub fn save_credentials(path: &Path, url: &str, token: &str) -> Result<(), ConfigError> {
        let mut table = if path.exists() {
            let contents =
                fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            contents
                .parse::<toml::Table>()
                .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?
        } else {
            toml::Table::new()
        };

        table.insert("url".to_string(), toml::Value::String(url.to_string()));
        table.insert("token".to_string(), toml::Value::String(token.to_string()));

        let text = toml::to_string_pretty(&table)
            .map_err(|e| ConfigError::ParseError(format!("TOML serialization failed: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        fs::write(path, text).map_err(|e| ConfigError::IoError(e.to_string()))
    }
}

/// Merged configuration plus where it came from
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub config: RunnerConfig,
    pub sources: Vec<ConfigSource>,
    merged: Value,
}

impl EffectiveConfig {
    /// Build the effective config from its layers.
    ///
    /// A missing config file is skipped; a present but unreadable one is an
    /// error.
    pub fn build(
        config_path: Option<&Path>,
        env_overrides: Option<Value>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
        }];

        if let Some(path) = config_path {
            if path.exists() {
                layers.push(Self::load_toml_file(path)?);
                sources.push(ConfigSource {
                    origin: ConfigOrigin::File,
                    path: Some(path.to_string_lossy().to_string()),
                });
            }
        }

        for (origin, layer) in [
            (ConfigOrigin::Env, env_overrides),
            (ConfigOrigin::Cli, cli_overrides),
        ] {
            if let Some(value) = layer.filter(|v| v.as_object().is_some_and(|m| !m.is_empty())) {
                layers.push(value);
                sources.push(ConfigSource { origin, path: None });
            }
        }

        let merged = merge_layers(layers);
        let mut config: RunnerConfig = serde_json::from_value(merged.clone())
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.root_dir = Some(Self::resolve_root(config.root_dir.take(), config_path)?);
        Self::validate_config(&config)?;

        Ok(Self {
            config,
            sources,
            merged,
        })
    }

    /// Read `CI_RUNNER_URL` / `CI_RUNNER_TOKEN` from the process environment.
    pub fn env_overrides() -> Option<Value> {
        let mut map = serde_json::Map::new();
        for (var, key) in [(ENV_URL, "url"), (ENV_TOKEN, "token")] {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    map.insert(key.to_string(), Value::String(value));
                }
            }
        }
        (!map.is_empty()).then_some(Value::Object(map))
    }

    fn resolve_root(root: Option<PathBuf>, config_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
        let base = match config_path
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
        {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().map_err(|e| ConfigError::IoError(e.to_string()))?,
        };

        Ok(match root {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => base.join(dir),
            None => base,
        })
    }

    /// Load and parse a TOML file
    fn load_toml_file(path: &Path) -> Result<Value, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let toml_value: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        Ok(Self::toml_to_json(toml_value))
    }

    /// Convert TOML Value to JSON Value
    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Self::toml_to_json).collect())
            }
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    fn validate_config(config: &RunnerConfig) -> Result<(), ConfigError> {
        let url = config.url.trim();
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "url must start with http:// or https://, got '{}'",
                url
            )));
        }

        if config.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }

        if !(1..=20).contains(&config.push_attempts) {
            return Err(ConfigError::ValidationError(
                "push_attempts must be in [1, 20]".to_string(),
            ));
        }

        if config.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Merged config with secrets replaced, plus the redacted key paths.
    pub fn redacted(&self) -> (Value, Vec<String>) {
        let mut value = self.merged.clone();
        if let (Some(map), Some(root)) = (value.as_object_mut(), self.config.root_dir.as_ref()) {
            map.insert(
                "root_dir".to_string(),
                Value::String(root.to_string_lossy().to_string()),
            );
        }
        let mut redactions = Vec::new();
        Self::redact_recursive(&mut value, String::new(), &mut redactions);
        (value, redactions)
    }

    /// Pretty JSON of the effective config, secrets redacted.
    pub fn to_redacted_json(&self) -> Result<String, ConfigError> {
        let (config, redactions) = self.redacted();
        let report = serde_json::json!({
            "config": config,
            "sources": self.sources,
            "redactions": redactions,
        });
        serde_json::to_string_pretty(&report).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn redact_recursive(value: &mut Value, path: String, redactions: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let current_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };

                    let is_secret = SECRET_KEYS.iter().any(|s| key_lower.contains(s));

                    if is_secret && !val.is_object() && !val.is_array() {
                        *val = Value::String("[REDACTED]".to_string());
                        redactions.push(current_path);
                    } else {
                        Self::redact_recursive(val, current_path, redactions);
                    }
                }
            }
            Value::Array(arr) => {
                for (i, val) in arr.iter_mut().enumerate() {
                    Self::redact_recursive(val, format!("{}[{}]", path, i), redactions);
                }
            }
            _ => {}
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_build_with_defaults_only() {
        let effective = EffectiveConfig::build(None, None, None).unwrap();

        assert_eq!(effective.config.poll_interval_secs, 2);
        assert_eq!(effective.config.push_attempts, 6);
        assert_eq!(effective.config.url, "");
        assert!(effective.config.projects.is_empty());
        assert_eq!(effective.sources.len(), 1);
        assert_eq!(effective.sources[0].origin, ConfigOrigin::Builtin);
    }

    #[test]
    fn test_load_toml_file() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "url = \"https://ci.example.com\"").unwrap();
        writeln!(temp, "token = \"abc\"").unwrap();
        writeln!(temp, "poll_interval_secs = 5").unwrap();
        writeln!(temp, "[[project]]").unwrap();
        writeln!(temp, "selector = \"id=3\"").unwrap();
        writeln!(temp, "project_dir = \"work/{{project_id}}\"").unwrap();

        let effective = EffectiveConfig::build(Some(temp.path()), None, None).unwrap();
        let config = &effective.config;

        assert_eq!(config.url, "https://ci.example.com");
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.push_attempts, 6);
        assert_eq!(config.projects.len(), 1);
        assert_eq!(
            config.projects[0].settings.project_dir.as_deref(),
            Some("work/{project_id}")
        );
        assert_eq!(effective.sources[1].origin, ConfigOrigin::File);
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runner.toml");

        let effective = EffectiveConfig::build(Some(&path), None, None).unwrap();
        assert_eq!(effective.sources.len(), 1);
        assert_eq!(effective.config.root_dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_layer_precedence() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "url = \"https://file.example.com\"").unwrap();
        writeln!(temp, "token = \"file-token\"").unwrap();

        let env = json!({"token": "env-token"});
        let cli = json!({"url": "https://cli.example.com"});
        let effective = EffectiveConfig::build(Some(temp.path()), Some(env), Some(cli)).unwrap();

        assert_eq!(effective.config.url, "https://cli.example.com");
        assert_eq!(effective.config.token, "env-token");
        let origins: Vec<_> = effective.sources.iter().map(|s| s.origin.clone()).collect();
        assert_eq!(
            origins,
            vec![ConfigOrigin::Builtin, ConfigOrigin::File, ConfigOrigin::Env, ConfigOrigin::Cli]
        );
    }

    #[test]
    fn test_validation_rejects_bad_url() {
        let result = EffectiveConfig::build(None, None, Some(json!({"url": "ftp://ci"})));
        assert!(result.unwrap_err().to_string().contains("url"));
    }

    #[test]
    fn test_validation_poll_interval() {
        let result = EffectiveConfig::build(None, None, Some(json!({"poll_interval_secs": 0})));
        assert!(result.unwrap_err().to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn test_validation_push_attempts() {
        for attempts in [0, 21] {
            let result =
                EffectiveConfig::build(None, None, Some(json!({"push_attempts": attempts})));
            assert!(result.unwrap_err().to_string().contains("push_attempts"));
        }
    }

    #[test]
    fn test_require_credentials() {
        let effective = EffectiveConfig::build(None, None, None).unwrap();
        assert!(effective.config.require_credentials().is_err());

        let cli = json!({"url": "http://localhost:3000", "token": "t"});
        let effective = EffectiveConfig::build(None, None, Some(cli)).unwrap();
        assert!(effective.config.require_credentials().is_ok());
    }

    #[test]
    fn test_relative_root_dir_is_anchored_to_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runner.toml");
        fs::write(&path, "root_dir = \"agent\"\n").unwrap();

        let effective = EffectiveConfig::build(Some(&path), None, None).unwrap();
        assert_eq!(effective.config.root_dir, Some(dir.path().join("agent")));
        assert_eq!(
            effective.config.projects_root(),
            dir.path().join("agent").join("projects")
        );
    }

    #[test]
    fn test_token_is_redacted() {
        let cli = json!({"url": "https://ci.example.com", "token": "super-secret"});
        let effective = EffectiveConfig::build(None, None, Some(cli)).unwrap();

        let (value, redactions) = effective.redacted();
        assert_eq!(value["token"], "[REDACTED]");
        assert_eq!(value["url"], "https://ci.example.com");
        assert_eq!(redactions, vec!["token".to_string()]);

        let json = effective.to_redacted_json().unwrap();
        assert!(!json.contains("super-secret"));
        // the typed config keeps the real token
        assert_eq!(effective.config.token, "super-secret");
    }

    #[test]
    fn test_save_credentials_preserves_other_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runner.toml");
        fs::write(
            &path,
            "url = \"http://old\"\npoll_interval_secs = 9\n\n[[project]]\nselector = \"*\"\n",
        )
        .unwrap();

        RunnerConfig::save_credentials(&path, "https://ci.example.com", "new-token").unwrap();

        let effective = EffectiveConfig::build(Some(&path), None, None).unwrap();
        assert_eq!(effective.config.url, "https://ci.example.com");
        assert_eq!(effective.config.token, "new-token");
        assert_eq!(effective.config.poll_interval_secs, 9);
        assert_eq!(effective.config.projects.len(), 1);
    }

    #[test]
    fn test_save_credentials_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("runner.toml");

        RunnerConfig::save_credentials(&path, "http://ci", "t").unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("url = \"http://ci\""));
        assert!(contents.contains("token = \"t\""));
    }
}
