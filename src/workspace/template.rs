//! Placeholder expansion for project settings templates.
//!
//! Recognized placeholders: `{project_dir}`, `{build_id}`, `{project_id}`,
//! `{project_name}` (whitespace stripped), `{commit}`, `{previous_commit}`,
//! `{repo_url}`, `{ref_name}`. Anything else in braces is left as written.
//!
//! Expansion is a single left-to-right pass: substituted values are never
//! scanned again, so a commit message or URL containing `{...}` stays as is.

use std::collections::BTreeMap;

use runner_protocol::JobDescriptor;

/// Placeholder values for one job.
#[derive(Debug, Clone)]
pub struct TemplateVars {
    values: BTreeMap<&'static str, String>,
}

impl TemplateVars {
    /// Values for `job`, with `{project_dir}` still empty.
    pub fn for_job(job: &JobDescriptor) -> Self {
        let values = BTreeMap::from([
            ("project_dir", String::new()),
            ("build_id", job.id.to_string()),
            ("project_id", job.project_id.to_string()),
            ("project_name", job.compact_project_name()),
            ("commit", job.sha.clone()),
            ("previous_commit", job.before_sha.clone()),
            ("repo_url", job.repo_url.clone()),
            ("ref_name", job.ref_name.clone()),
        ]);
        Self { values }
    }

    /// Make the resolved workspace directory available as `{project_dir}`.
    pub fn with_project_dir(mut self, project_dir: impl Into<String>) -> Self {
        self.values.insert("project_dir", project_dir.into());
        self
    }

    /// Value of one placeholder, by name without braces.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            let value = after
                .find('}')
                .and_then(|close| self.get(&after[..close]).map(|v| (v, close)));

            match value {
                Some((value, close)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn job() -> JobDescriptor {
        JobDescriptor {
            id: 9312,
            project_id: 4,
            project_name: "My Project".to_string(),
            commands: "make".to_string(),
            repo_url: "https://git.example.com/my.git".to_string(),
            sha: "2e008a7".to_string(),
            before_sha: "1234567".to_string(),
            ref_name: "main".to_string(),
            timeout: 1800,
            allow_git_fetch: true,
        }
    }

    #[test]
    fn test_all_placeholders() {
        let vars = TemplateVars::for_job(&job()).with_project_dir("/w/p4");
        let out = vars.expand(
            "{project_dir} {build_id} {project_id} {project_name} {commit} {previous_commit} {repo_url} {ref_name}",
        );
        assert_eq!(
            out,
            "/w/p4 9312 4 MyProject 2e008a7 1234567 https://git.example.com/my.git main"
        );
    }

    #[test]
    fn test_project_dir_empty_before_resolution() {
        let vars = TemplateVars::for_job(&job());
        assert_eq!(vars.expand("{project_dir}builds/{project_id}"), "builds/4");
    }

    #[test]
    fn test_lookup_by_name() {
        let vars = TemplateVars::for_job(&job());
        assert_eq!(vars.get("project_name"), Some("MyProject"));
        assert_eq!(vars.get("project_dir"), Some(""));
        assert_eq!(vars.get("unknown"), None);
        assert_eq!(vars.get("{commit}"), None);

        let vars = vars.with_project_dir("/w/p4");
        assert_eq!(vars.get("project_dir"), Some("/w/p4"));
    }

    #[test]
    fn test_unknown_placeholder_kept() {
        let vars = TemplateVars::for_job(&job());
        assert_eq!(vars.expand("echo {unknown} {commit}"), "echo {unknown} 2e008a7");
    }

    #[test]
    fn test_unbalanced_braces() {
        let vars = TemplateVars::for_job(&job());
        assert_eq!(vars.expand("{{commit}"), "{2e008a7");
        assert_eq!(vars.expand("a { b"), "a { b");
        assert_eq!(vars.expand("trailing {"), "trailing {");
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let mut tricky = job();
        tricky.ref_name = "{commit}".to_string();
        let vars = TemplateVars::for_job(&tricky);
        assert_eq!(vars.expand("{ref_name}"), "{commit}");
    }

    proptest! {
        #[test]
        fn prop_text_without_braces_is_unchanged(text in "[^{}]*") {
            let vars = TemplateVars::for_job(&job());
            prop_assert_eq!(vars.expand(&text), text);
        }

        #[test]
        fn prop_surrounding_text_is_preserved(prefix in "[^{}]*", suffix in "[^{}]*") {
            let vars = TemplateVars::for_job(&job());
            let out = vars.expand(&format!("{}{{build_id}}{}", prefix, suffix));
            prop_assert_eq!(out, format!("{}9312{}", prefix, suffix));
        }
    }
}
