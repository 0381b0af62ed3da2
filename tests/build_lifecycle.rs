//! Build lifecycle tests driven by a real `runner.toml`
//!
//! Project rules come from the config file, workspaces live under a temp
//! root and every command runs through the process supervisor.

#![cfg(unix)]

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ci_runner::build::{Build, BuildContext, BuildOptions, BuildStatus};
use ci_runner::config::EffectiveConfig;
use ci_runner::workspace::WorkspaceManager;
use runner_protocol::JobDescriptor;
use tempfile::TempDir;

const CONFIG: &str = r#"
url = "https://ci.example.com"
token = "runner-token"
termination_grace_secs = 1

[[project]]
selector = "id=42|name=BrokenProject"
project_dir = "custom/{project_name}"
new_repo_init = "mkdir -p {project_dir} && echo cloning {repo_url}"
existing_repo_init = "echo refreshing {commit}"

[[project]]
selector = "*"
new_repo_init = "mkdir -p {project_dir}"
"#;

const MALFORMED_CONFIG: &str = r#"
[[project]]
selector = "id=42"

[[project]]
selector = "branch=main"

[[project]]
selector = "*"
new_repo_init = "mkdir -p {project_dir}"
"#;

fn job(id: u64, project_id: u64, name: &str, commands: &str) -> JobDescriptor {
    JobDescriptor {
        id,
        project_id,
        project_name: name.to_string(),
        commands: commands.to_string(),
        repo_url: "https://git.example.com/app.git".to_string(),
        sha: "2e008a711430a16092cd6a20c225807cb3f51db7".to_string(),
        ref_name: "master".to_string(),
        timeout: 30,
        ..JobDescriptor::default()
    }
}

fn context(root: &TempDir) -> BuildContext {
    context_from(root, CONFIG)
}

fn context_from(root: &TempDir, contents: &str) -> BuildContext {
    let path = root.path().join("runner.toml");
    fs::write(&path, contents).unwrap();
    let effective = EffectiveConfig::build(Some(&path), None, None).unwrap();
    let config = effective.config;

    BuildContext::new(
        Arc::new(config.project_rules()),
        WorkspaceManager::new(config.root_dir.clone().unwrap()),
        BuildOptions::from_config(&config),
    )
}

#[test]
fn test_matching_rule_chooses_workspace() {
    let root = TempDir::new().unwrap();
    let build = context(&root).build(job(1, 42, "My App", "pwd"));

    build.run();

    assert_eq!(build.status(), BuildStatus::Success);
    let expected = root.path().join("custom").join("MyApp");
    assert_eq!(build.project_dir(), Some(expected.as_path()));
    let output = build.output();
    assert!(output.contains("cloning https://git.example.com/app.git"));
    assert!(output.lines().any(|l| l.ends_with("custom/MyApp")));
}

#[test]
fn test_fallback_rule_uses_default_workspace() {
    let root = TempDir::new().unwrap();
    let build = context(&root).build(job(2, 7, "other", "echo built"));

    build.run();

    assert_eq!(build.status(), BuildStatus::Success);
    let expected = root.path().join("projects").join("project-7");
    assert_eq!(build.project_dir(), Some(expected.as_path()));
    assert!(build.output().contains("built"));
}

#[test]
fn test_malformed_selector_fails_build() {
    let root = TempDir::new().unwrap();
    // Skips the first rule, so the lookup reaches `branch=main`.
    let build = context_from(&root, MALFORMED_CONFIG).build(job(3, 8, "other", "echo never"));

    build.run();

    assert_eq!(build.status(), BuildStatus::Failed);
    assert!(build.is_completed());
    let output = build.output();
    assert!(output.contains("A runner exception occurred"));
    assert!(output.contains("branch=main"));
    assert!(!output.contains("never"));
}

#[test]
fn test_name_selector_ignores_whitespace() {
    let root = TempDir::new().unwrap();
    let build = context(&root).build(job(4, 9, "Broken Project", "true"));

    build.run();

    assert_eq!(build.status(), BuildStatus::Success);
    let expected = root.path().join("custom").join("BrokenProject");
    assert_eq!(build.project_dir(), Some(expected.as_path()));
}

#[test]
fn test_existing_checkout_is_refreshed() {
    let root = TempDir::new().unwrap();
    let context = context(&root);
    let workspace = root.path().join("custom").join("MyApp");
    fs::create_dir_all(workspace.join(".git")).unwrap();
    fs::write(workspace.join("keep.txt"), "kept").unwrap();

    let mut descriptor = job(5, 42, "My App", "cat keep.txt");
    descriptor.allow_git_fetch = true;
    let build = context.build(descriptor);

    build.run();

    assert_eq!(build.status(), BuildStatus::Success);
    let output = build.output();
    assert!(output.contains("refreshing 2e008a711430a16092cd6a20c225807cb3f51db7"));
    assert!(output.lines().any(|l| l == "kept"));
}

#[test]
fn test_stale_workspace_is_replaced_without_fetch() {
    let root = TempDir::new().unwrap();
    let context = context(&root);
    let workspace = root.path().join("custom").join("MyApp");
    fs::create_dir_all(workspace.join(".git")).unwrap();
    fs::write(workspace.join("stale.txt"), "old").unwrap();

    let build = context.build(job(6, 42, "My App", "ls"));

    build.run();

    assert_eq!(build.status(), BuildStatus::Success);
    assert!(!workspace.join("stale.txt").exists());
    assert!(build.output().contains("cloning"));
}

#[test]
fn test_terminate_during_command() {
    let root = TempDir::new().unwrap();
    let build = Arc::new(context(&root).build(job(7, 7, "other", "sleep 30\necho after")));

    let worker = {
        let build = Arc::clone(&build);
        thread::spawn(move || build.run())
    };

    let deadline = Instant::now() + Duration::from_secs(10);
    while !build.output().lines().any(|l| l == "sleep 30") {
        assert!(Instant::now() < deadline, "command never started");
        thread::sleep(Duration::from_millis(20));
    }

    let started = Instant::now();
    build.terminate();
    worker.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(build.status(), BuildStatus::Aborted);
    assert!(build.is_completed());
    assert!(!build.output().contains("after"));
}

#[test]
fn test_terminate_before_start() {
    let root = TempDir::new().unwrap();
    let build: Build = context(&root).build(job(8, 7, "other", "echo never"));

    build.terminate();
    build.run();

    assert_eq!(build.status(), BuildStatus::Aborted);
    assert!(build.is_completed());
    assert!(build.output().is_empty());
    assert!(build.project_dir().is_none());
}
