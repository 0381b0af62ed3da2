//! Job descriptor handed out by the coordinator.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtocolError;

/// A pending build as returned by `POST /builds/register.json`.
///
/// Immutable once received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Build identifier.
    pub id: u64,
    /// Project identifier.
    pub project_id: u64,
    /// Human-readable project name.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub project_name: String,
    /// Raw multi-line command blob.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub commands: String,
    /// Repository clone URL.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub repo_url: String,
    /// Commit to build.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sha: String,
    /// Commit before the push that triggered the build.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub before_sha: String,
    /// Branch or tag name.
    #[serde(rename = "ref", alias = "ref_name", default, deserialize_with = "null_as_empty")]
    pub ref_name: String,
    /// Per-command timeout in seconds (0 = use the runner default).
    #[serde(default)]
    pub timeout: u64,
    /// Whether an existing checkout may be refreshed instead of re-cloned.
    #[serde(default)]
    pub allow_git_fetch: bool,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl JobDescriptor {
    /// Decode a descriptor from a response body.
    ///
    /// Only a descriptor without a usable id is rejected here: anything
    /// else can still be reported back to the coordinator as a failed build.
    pub fn from_json(body: &str) -> Result<Self, ProtocolError> {
        let job: JobDescriptor = serde_json::from_str(body)?;
        job.validate_id()?;
        Ok(job)
    }

    /// Check that the descriptor names a build the coordinator can track.
    pub fn validate_id(&self) -> Result<(), ProtocolError> {
        if self.id == 0 {
            return Err(ProtocolError::invalid("id", "must be non-zero"));
        }
        Ok(())
    }

    /// Check the fields a build cannot run without.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.validate_id()?;
        if self.sha.trim().is_empty() {
            return Err(ProtocolError::invalid("sha", "must not be empty"));
        }
        if self.repo_url.trim().is_empty() {
            return Err(ProtocolError::invalid("repo_url", "must not be empty"));
        }
        Ok(())
    }

    /// Split the command blob into individual commands.
    ///
    /// Any run of `\r` / `\n` separates two commands; each command is
    /// trimmed and empty ones are dropped.
    pub fn commands(&self) -> Vec<String> {
        split_commands(&self.commands)
    }

    /// Project name with all whitespace removed, as used in paths and
    /// placeholders.
    pub fn compact_project_name(&self) -> String {
        self.project_name
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect()
    }
}

/// Split a command blob on any line-ending style.
pub fn split_commands(blob: &str) -> Vec<String> {
    blob.split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "id": 9312,
            "project_id": 0,
            "project_name": "six",
            "commands": "dir",
            "repo_url": "https://github.com/randx/six.git",
            "sha": "2e008a711430a16092cd6a20c225807cb3f51db7",
            "before_sha": "1234",
            "ref": "master",
            "timeout": 1800,
            "allow_git_fetch": false
        })
    }

    #[test]
    fn test_descriptor_deserialization() {
        let job = JobDescriptor::from_json(&sample().to_string()).unwrap();
        assert_eq!(job.id, 9312);
        assert_eq!(job.ref_name, "master");
        assert_eq!(job.timeout, 1800);
        assert!(!job.allow_git_fetch);
        assert_eq!(job.commands(), vec!["dir".to_string()]);
    }

    #[test]
    fn test_ref_name_alias_and_nulls() {
        let mut value = sample();
        let obj = value.as_object_mut().unwrap();
        obj.remove("ref");
        obj.insert("ref_name".into(), json!("develop"));
        obj.insert("before_sha".into(), serde_json::Value::Null);
        obj.remove("timeout");

        let job = JobDescriptor::from_json(&value.to_string()).unwrap();
        assert_eq!(job.ref_name, "develop");
        assert_eq!(job.before_sha, "");
        assert_eq!(job.timeout, 0);
    }

    #[test]
    fn test_ref_serializes_under_wire_name() {
        let job: JobDescriptor = serde_json::from_value(sample()).unwrap();
        let out = serde_json::to_value(&job).unwrap();
        assert_eq!(out["ref"], "master");
        assert!(out.get("ref_name").is_none());
    }

    #[test]
    fn test_missing_sha_decodes_but_fails_validation() {
        let mut value = sample();
        value["sha"] = json!("");
        let job = JobDescriptor::from_json(&value.to_string()).unwrap();
        assert_eq!(job.id, 9312);
        let err = job.validate().unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "sha", .. }));
    }

    #[test]
    fn test_missing_repo_url_fails_validation() {
        let mut value = sample();
        value["repo_url"] = serde_json::Value::Null;
        let job = JobDescriptor::from_json(&value.to_string()).unwrap();
        let err = job.validate().unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "repo_url", .. }));
    }

    #[test]
    fn test_zero_id_rejected_at_decode() {
        let mut value = sample();
        value["id"] = json!(0);
        let err = JobDescriptor::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "id", .. }));
    }

    #[test]
    fn test_malformed_body() {
        let err = JobDescriptor::from_json("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_split_mixed_line_endings() {
        let cmds = split_commands("bundle install\r\n  rake spec \r\rmake\n\n\necho done\n");
        assert_eq!(cmds, vec!["bundle install", "rake spec", "make", "echo done"]);
    }

    #[test]
    fn test_split_blank_blob() {
        assert!(split_commands("  \r\n \n").is_empty());
    }

    #[test]
    fn test_compact_project_name() {
        let mut job: JobDescriptor = serde_json::from_value(sample()).unwrap();
        job.project_name = "My  Great\tProject".to_string();
        assert_eq!(job.compact_project_name(), "MyGreatProject");
    }

    proptest! {
        #[test]
        fn split_yields_trimmed_non_empty_commands(blob in "[a-z \t\r\n]{0,64}") {
            for cmd in split_commands(&blob) {
                prop_assert!(!cmd.is_empty());
                prop_assert_eq!(cmd.trim(), cmd.as_str());
                prop_assert!(!cmd.contains('\n') && !cmd.contains('\r'));
            }
        }

        #[test]
        fn split_preserves_line_order(lines in proptest::collection::vec("[a-z]{1,8}", 0..8)) {
            let blob = lines.join("\r\n");
            prop_assert_eq!(split_commands(&blob), lines);
        }
    }
}
