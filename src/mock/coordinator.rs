//! Mock Coordinator Implementation
//!
//! Configurable coordinator for testing the runner's client and scheduler.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use runner_protocol::{paths, JobDescriptor, WireState};
use serde_json::{json, Value};

use crate::client::{HttpMethod, HttpReply, TransportError};

use super::failure::{FailureConfig, FailureInjector};
use super::Endpoint;

/// A request the coordinator received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub endpoint: Endpoint,
    pub path: String,
    pub body: Value,
}

#[derive(Debug, Default)]
struct BuildRecord {
    states: Vec<WireState>,
    last_trace: String,
}

#[derive(Debug)]
struct CoordinatorState {
    registration_token: String,
    runner_token: String,
    next_runner_id: u64,
    pending: VecDeque<JobDescriptor>,
    builds: HashMap<u64, BuildRecord>,
    dropped: HashSet<u64>,
    requests: Vec<RecordedRequest>,
}

/// Configurable mock coordinator for testing. Clones share state.
#[derive(Clone)]
pub struct MockCoordinator {
    state: Arc<Mutex<CoordinatorState>>,
    failures: Arc<Mutex<FailureInjector>>,
}

impl Default for MockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCoordinator {
    /// Coordinator accepting registration token `register-me` and issuing
    /// runner token `runner-token`
    pub fn new() -> Self {
        Self::with_tokens("register-me", "runner-token")
    }

    pub fn with_tokens(registration_token: &str, runner_token: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(CoordinatorState {
                registration_token: registration_token.to_string(),
                runner_token: runner_token.to_string(),
                next_runner_id: 1,
                pending: VecDeque::new(),
                builds: HashMap::new(),
                dropped: HashSet::new(),
                requests: Vec::new(),
            })),
            failures: Arc::new(Mutex::new(FailureInjector::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_failures(&self) -> MutexGuard<'_, FailureInjector> {
        self.failures.lock().unwrap_or_else(|p| p.into_inner())
    }

    // === Public API for test configuration ===

    /// Queue a job for the next build request
    pub fn enqueue(&self, job: JobDescriptor) {
        self.lock().pending.push_back(job);
    }

    pub fn pending_jobs(&self) -> usize {
        self.lock().pending.len()
    }

    /// Forget a build; further pushes for it answer 404
    pub fn drop_build(&self, build_id: u64) {
        self.lock().dropped.insert(build_id);
    }

    /// Inject a failure for an endpoint
    pub fn inject(&self, endpoint: Endpoint, config: FailureConfig) {
        self.lock_failures().inject(endpoint, config);
    }

    /// Answer the next `count` status pushes with 500
    pub fn fail_next_pushes(&self, count: u32) {
        self.inject(
            Endpoint::UpdateBuild,
            FailureConfig::status(500).with_fail_count(count),
        );
    }

    /// Make every build request fail at the transport level
    pub fn fail_fetches(&self) {
        self.inject(Endpoint::RequestBuild, FailureConfig::unreachable());
    }

    pub fn clear_failures(&self) {
        self.lock_failures().clear();
    }

    // === Inspection ===

    pub fn requests(&self, endpoint: Endpoint) -> Vec<RecordedRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .cloned()
            .collect()
    }

    pub fn request_count(&self, endpoint: Endpoint) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .count()
    }

    /// States accepted for a build, in arrival order
    pub fn pushed_states(&self, build_id: u64) -> Vec<WireState> {
        self.lock()
            .builds
            .get(&build_id)
            .map(|b| b.states.clone())
            .unwrap_or_default()
    }

    pub fn last_state(&self, build_id: u64) -> Option<WireState> {
        self.pushed_states(build_id).last().copied()
    }

    /// Trace from the last accepted push
    pub fn last_trace(&self, build_id: u64) -> Option<String> {
        self.lock()
            .builds
            .get(&build_id)
            .filter(|b| !b.states.is_empty())
            .map(|b| b.last_trace.clone())
    }

    // === Request handling ===

    /// Handle one request as the real coordinator would
    pub fn handle(
        &self,
        method: HttpMethod,
        path: &str,
        body: &Value,
    ) -> Result<HttpReply, TransportError> {
        let endpoint = match route(method, path) {
            Some(endpoint) => endpoint,
            None => return Ok(HttpReply::new(404, "")),
        };

        self.lock().requests.push(RecordedRequest {
            endpoint,
            path: path.to_string(),
            body: body.clone(),
        });

        if let Some(failure) = self.lock_failures().check(endpoint) {
            if let Some(delay) = failure.delay {
                thread::sleep(delay);
            }
            if failure.unreachable {
                return Err(TransportError::ConnectionFailed(
                    "connection refused (injected)".to_string(),
                ));
            }
            if let Some(status) = failure.status {
                return Ok(HttpReply::new(status, ""));
            }
        }

        let token = body.get("token").and_then(Value::as_str).unwrap_or("");
        let mut state = self.lock();

        let reply = match endpoint {
            Endpoint::RegisterRunner => {
                if token != state.registration_token {
                    return Ok(HttpReply::new(403, r#"{"message":"403 Forbidden"}"#));
                }
                let id = state.next_runner_id;
                state.next_runner_id += 1;
                HttpReply::new(201, json!({"id": id, "token": state.runner_token}).to_string())
            }
            Endpoint::RequestBuild => {
                if token != state.runner_token {
                    return Ok(HttpReply::new(403, r#"{"message":"403 Forbidden"}"#));
                }
                match state.pending.pop_front() {
                    Some(job) => {
                        state.builds.entry(job.id).or_default();
                        HttpReply::new(201, serde_json::to_string(&job)?)
                    }
                    None => HttpReply::new(204, ""),
                }
            }
            Endpoint::UpdateBuild => {
                if token != state.runner_token {
                    return Ok(HttpReply::new(403, r#"{"message":"403 Forbidden"}"#));
                }
                let Some(build_id) = build_id_from_path(path) else {
                    return Ok(HttpReply::new(404, ""));
                };
                if state.dropped.contains(&build_id) {
                    return Ok(HttpReply::new(404, r#"{"message":"404 Not found"}"#));
                }
                let Some(record) = state.builds.get_mut(&build_id) else {
                    return Ok(HttpReply::new(404, r#"{"message":"404 Not found"}"#));
                };
                let wire_state = body
                    .get("state")
                    .cloned()
                    .map(serde_json::from_value::<WireState>)
                    .transpose()?;
                let Some(wire_state) = wire_state else {
                    return Ok(HttpReply::new(400, r#"{"message":"state missing"}"#));
                };
                record.states.push(wire_state);
                record.last_trace = body
                    .get("trace")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                HttpReply::new(200, json!({"id": build_id}).to_string())
            }
        };

        Ok(reply)
    }
}

fn route(method: HttpMethod, path: &str) -> Option<Endpoint> {
    match method {
        HttpMethod::Post if path == paths::REGISTER_RUNNER => Some(Endpoint::RegisterRunner),
        HttpMethod::Post if path == paths::REQUEST_BUILD => Some(Endpoint::RequestBuild),
        HttpMethod::Put if build_id_from_path(path).is_some() => Some(Endpoint::UpdateBuild),
        _ => None,
    }
}

fn build_id_from_path(path: &str) -> Option<u64> {
    path.strip_prefix("/builds/")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}
