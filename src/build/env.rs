//! Environment overlay for build commands.

use std::collections::BTreeMap;
use std::path::Path;

use runner_protocol::JobDescriptor;

/// Variables set on top of the runner's own environment for every command.
///
/// Interpreter override variables are blanked so the runner's environment
/// does not leak into the job.
pub fn build_env(job: &JobDescriptor, project_dir: &Path) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    if let Some(home) = dirs::home_dir() {
        env.insert("HOME".to_string(), home.to_string_lossy().to_string());
    }

    let gemfile = project_dir.join("Gemfile");
    env.insert("BUNDLE_GEMFILE".to_string(), gemfile.to_string_lossy().to_string());
    env.insert("BUNDLE_BIN_PATH".to_string(), String::new());
    env.insert("RUBYOPT".to_string(), String::new());

    env.insert("CI_SERVER".to_string(), "yes".to_string());
    env.insert("CI_SERVER_NAME".to_string(), "GitLab CI".to_string());
    env.insert("CI_BUILD_REF".to_string(), job.sha.clone());
    env.insert("CI_BUILD_BEFORE_SHA".to_string(), job.before_sha.clone());
    env.insert("CI_BUILD_REF_NAME".to_string(), job.ref_name.clone());
    env.insert("CI_BUILD_ID".to_string(), job.id.to_string());
    env.insert("CI_PROJECT_ID".to_string(), job.project_id.to_string());
    env.insert(
        "CI_PROJECT_DIR".to_string(),
        project_dir.to_string_lossy().to_string(),
    );

    env
}
