//! Workspace manager
//!
//! Decides how a job's source checkout is materialized and composes the
//! shell commands that do it. Nothing is executed here; the only side
//! effects are creating the projects root and deleting a stale workspace
//! before a fresh clone.

mod cleanup;
mod template;

pub use cleanup::remove_workspace;
pub use template::TemplateVars;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use runner_protocol::JobDescriptor;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ProjectSettings;

/// Errors while preparing a workspace
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("cannot create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot remove stale workspace {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How the checkout is brought up to date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    /// Existing repository: reset, clean, fetch, checkout
    Refresh,
    /// Fresh clone into an empty location
    Clone,
}

/// Commands that prepare the workspace, run before the job's own commands
#[derive(Debug, Clone)]
pub struct WorkspacePlan {
    pub project_dir: PathBuf,
    pub mode: CheckoutMode,
    pub commands: Vec<String>,
}

/// Resolves workspace directories under an agent root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Parent of the default per-project workspaces
    pub fn projects_root(&self) -> PathBuf {
        self.root_dir.join("projects")
    }

    /// Workspace used when settings do not name one
    pub fn default_dir(&self, job: &JobDescriptor) -> PathBuf {
        self.projects_root().join(format!("project-{}", job.project_id))
    }

    /// Workspace directory for a job.
    ///
    /// The settings template wins when it expands to something non-empty
    /// whose parent exists or can be created; relative templates are taken
    /// against the agent root.
    pub fn resolve_dir(&self, job: &JobDescriptor, settings: &ProjectSettings) -> PathBuf {
        let vars = TemplateVars::for_job(job);
        let expanded = settings
            .project_dir
            .as_deref()
            .map(|template| vars.expand(template))
            .unwrap_or_default();
        let expanded = expanded.trim();

        if !expanded.is_empty() {
            let candidate = Path::new(expanded);
            let candidate = if candidate.is_absolute() {
                candidate.to_path_buf()
            } else {
                self.root_dir.join(candidate)
            };
            if usable_location(&candidate) {
                return candidate;
            }
            debug!(dir = %candidate.display(), "configured workspace unusable, using default");
        }

        self.default_dir(job)
    }

    /// Decide refresh vs clone and compose the preparation commands.
    pub fn prepare(
        &self,
        job: &JobDescriptor,
        settings: &ProjectSettings,
    ) -> Result<WorkspacePlan, WorkspaceError> {
        let projects_root = self.projects_root();
        fs::create_dir_all(&projects_root).map_err(|source| WorkspaceError::CreateDir {
            path: projects_root.clone(),
            source,
        })?;

        let project_dir = self.resolve_dir(job, settings);
        let dir_text = project_dir.to_string_lossy().to_string();
        let vars = TemplateVars::for_job(job).with_project_dir(dir_text);
        let custom = |template: &Option<String>| {
            template
                .as_deref()
                .map(|t| vars.expand(t))
                .filter(|cmd| !cmd.trim().is_empty())
        };

        let mode = if project_dir.join(".git").is_dir() && job.allow_git_fetch {
            CheckoutMode::Refresh
        } else {
            CheckoutMode::Clone
        };

        let mut commands = Vec::new();
        match mode {
            CheckoutMode::Refresh => match custom(&settings.existing_repo_init) {
                Some(cmd) => commands.push(cmd),
                None => {
                    commands.push(fetch_command(&project_dir));
                    commands.push(checkout_command(&project_dir, &job.sha));
                }
            },
            CheckoutMode::Clone => {
                if fs::symlink_metadata(&project_dir).is_ok() {
                    info!(dir = %project_dir.display(), "removing stale workspace");
                    remove_workspace(&project_dir).map_err(|source| WorkspaceError::Remove {
                        path: project_dir.clone(),
                        source,
                    })?;
                }
                match custom(&settings.new_repo_init) {
                    Some(cmd) => commands.push(cmd),
                    None => {
                        commands.push(clone_command(&project_dir, &job.repo_url));
                        commands.push(checkout_command(&project_dir, &job.sha));
                    }
                }
            }
        }

        if let Some(cmd) = custom(&settings.post_prepare) {
            commands.push(cmd);
        }

        debug!(build_id = job.id, ?mode, commands = commands.len(), "workspace planned");
        Ok(WorkspacePlan {
            project_dir,
            mode,
            commands,
        })
    }
}

fn usable_location(dir: &Path) -> bool {
    if dir.is_dir() {
        return true;
    }
    match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).is_ok(),
        _ => false,
    }
}

fn fetch_command(dir: &Path) -> String {
    format!(
        "{} && git reset --hard && git clean -f && git fetch",
        cd(dir)
    )
}

fn checkout_command(dir: &Path, sha: &str) -> String {
    format!(
        "{} && git reset --hard && git checkout {}",
        cd(dir),
        quote(sha)
    )
}

fn clone_command(dir: &Path, repo_url: &str) -> String {
    let parent = dir.parent().unwrap_or(dir);
    let folder = dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    format!(
        "{} && git clone {} {}",
        cd(parent),
        quote(repo_url),
        quote(&folder)
    )
}

#[cfg(windows)]
fn cd(dir: &Path) -> String {
    format!("cd /d {}", quote(&dir.to_string_lossy()))
}

#[cfg(not(windows))]
fn cd(dir: &Path) -> String {
    format!("cd {}", quote(&dir.to_string_lossy()))
}

#[cfg(windows)]
fn quote(arg: &str) -> String {
    format!("\"{}\"", arg.replace('"', "\"\""))
}

#[cfg(not(windows))]
fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}
