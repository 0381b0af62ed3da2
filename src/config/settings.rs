//! Per-project settings rules
//!
//! `[[project]]` tables in `runner.toml` attach workspace settings to
//! projects. Each rule has a selector made of `|`-separated alternatives:
//!
//! - `id=<n>` matches the project id
//! - `name=<name>` matches the project name as-is or with whitespace removed
//! - `*` matches every project
//!
//! Rules are tried in file order and the first match wins. Selectors are
//! checked lazily, so a malformed alternative is reported only when the
//! lookup reaches it.

use runner_protocol::JobDescriptor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from settings lookup
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("unknown project filter '{alternative}' in selector '{selector}'")]
    UnknownFilter { selector: String, alternative: String },

    #[error("project id '{value}' in selector '{selector}' is not a number")]
    InvalidId { selector: String, value: String },
}

/// Workspace settings for one project. Values are raw templates;
/// placeholders are expanded by the workspace manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSettings {
    /// Workspace directory template, absolute or relative to the runner root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_dir: Option<String>,

    /// Replaces the default clone + checkout for a fresh workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_repo_init: Option<String>,

    /// Replaces the default reset + fetch for an existing workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_repo_init: Option<String>,

    /// Runs after the workspace has been prepared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_prepare: Option<String>,
}

/// One `[[project]]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRule {
    pub selector: String,

    #[serde(flatten)]
    pub settings: ProjectSettings,
}

/// Anything that can produce project settings for a job.
pub trait ProjectSettingsSource: Send + Sync {
    fn lookup(&self, job: &JobDescriptor) -> Result<ProjectSettings, SettingsError>;
}

/// Fixed settings for every job.
impl ProjectSettingsSource for ProjectSettings {
    fn lookup(&self, _job: &JobDescriptor) -> Result<ProjectSettings, SettingsError> {
        Ok(self.clone())
    }
}

/// Ordered rule list from the configuration file
#[derive(Debug, Clone, Default)]
pub struct ProjectRules {
    rules: Vec<ProjectRule>,
}

impl ProjectRules {
    pub fn new(rules: Vec<ProjectRule>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl ProjectSettingsSource for ProjectRules {
    fn lookup(&self, job: &JobDescriptor) -> Result<ProjectSettings, SettingsError> {
        for rule in &self.rules {
            if selector_matches(&rule.selector, job)? {
                return Ok(rule.settings.clone());
            }
        }
        Ok(ProjectSettings::default())
    }
}

fn selector_matches(selector: &str, job: &JobDescriptor) -> Result<bool, SettingsError> {
    for alternative in selector.split('|').map(str::trim) {
        if alternative == "*" {
            return Ok(true);
        }

        let Some((key, value)) = alternative.split_once('=') else {
            return Err(SettingsError::UnknownFilter {
                selector: selector.to_string(),
                alternative: alternative.to_string(),
            });
        };

        let matched = match key.trim() {
            "id" => {
                let id: u64 = value.trim().parse().map_err(|_| SettingsError::InvalidId {
                    selector: selector.to_string(),
                    value: value.to_string(),
                })?;
                id == job.project_id
            }
            "name" => value == job.project_name || value == job.compact_project_name(),
            _ => {
                return Err(SettingsError::UnknownFilter {
                    selector: selector.to_string(),
                    alternative: alternative.to_string(),
                })
            }
        };

        if matched {
            return Ok(true);
        }
    }
    Ok(false)
}
