//! Coordinator Client
//!
//! The only component that talks to the coordinator. Registration and job
//! requests are single attempts; status pushes are retried with a fixed
//! delay and their replies classified:
//!
//! - 2xx: accepted
//! - 404: the coordinator no longer knows the build (remote abort)
//! - anything else, including transport errors: transient, retried

mod transport;

pub use transport::{HttpMethod, HttpReply, HttpTransport, MockTransport, Transport, TransportError};

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use runner_protocol::{
    paths, JobDescriptor, ProtocolError, RegisterRunnerRequest, RegisterRunnerResponse,
    RequestBuildRequest, UpdateBuildRequest, WireState,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Attempts per status push
    pub push_attempts: u32,
    /// Fixed delay between push attempts
    pub push_retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            push_attempts: 6,
            push_retry_delay: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            push_attempts: config.push_attempts.max(1),
            push_retry_delay: config.push_retry_delay(),
        }
    }
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Coordinator answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid coordinator response: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Registration response carried no runner token")]
    MissingToken,
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Classified result of a status push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The coordinator accepted the update
    Success,
    /// The coordinator no longer knows the build
    Aborted,
    /// Every attempt failed transiently
    Failed,
}

/// Client for the coordinator API
pub struct CoordinatorClient {
    transport: Arc<dyn Transport>,
    token: String,
    config: ClientConfig,
}

impl CoordinatorClient {
    pub fn new(transport: Arc<dyn Transport>, token: impl Into<String>) -> Self {
        Self::with_config(transport, token, ClientConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn Transport>,
        token: impl Into<String>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            token: token.into(),
            config,
        }
    }

    fn send<T: Serialize>(&self, method: HttpMethod, path: &str, body: &T) -> ClientResult<HttpReply> {
        let body = serde_json::to_value(body).map_err(TransportError::from)?;
        Ok(self.transport.send(method, path, &body)?)
    }

    /// Exchange a registration token for a runner token. Single attempt.
    pub fn try_register(
        transport: &dyn Transport,
        registration_token: &str,
        public_key: &str,
    ) -> ClientResult<String> {
        let request = RegisterRunnerRequest {
            token: registration_token.to_string(),
            public_key: public_key.to_string(),
        };
        let body = serde_json::to_value(&request).map_err(TransportError::from)?;
        let reply = transport.send(HttpMethod::Post, paths::REGISTER_RUNNER, &body)?;

        if !reply.is_success() {
            return Err(ClientError::Status {
                status: reply.status,
                body: reply.body,
            });
        }

        let response: RegisterRunnerResponse =
            serde_json::from_str(&reply.body).map_err(ProtocolError::from)?;
        response
            .runner_token()
            .map(str::to_string)
            .ok_or(ClientError::MissingToken)
    }

    /// [`try_register`](Self::try_register), logging and discarding the error.
    pub fn register(transport: &dyn Transport, registration_token: &str, public_key: &str) -> Option<String> {
        match Self::try_register(transport, registration_token, public_key) {
            Ok(token) => {
                info!("runner registered");
                Some(token)
            }
            Err(e) => {
                warn!(error = %e, "runner registration failed");
                None
            }
        }
    }

    /// Ask for a pending job. `Ok(None)` means the coordinator has no work.
    pub fn try_fetch_job(&self) -> ClientResult<Option<JobDescriptor>> {
        let request = RequestBuildRequest {
            token: self.token.clone(),
        };
        let reply = self.send(HttpMethod::Post, paths::REQUEST_BUILD, &request)?;

        match reply.status {
            204 | 404 => Ok(None),
            _ if reply.is_success() && reply.body.trim().is_empty() => Ok(None),
            _ if reply.is_success() => Ok(Some(JobDescriptor::from_json(&reply.body)?)),
            status => Err(ClientError::Status {
                status,
                body: reply.body,
            }),
        }
    }

    /// [`try_fetch_job`](Self::try_fetch_job), logging and discarding the error.
    pub fn fetch_job(&self) -> Option<JobDescriptor> {
        match self.try_fetch_job() {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "failed to request a build");
                None
            }
        }
    }

    /// Report state and full trace for a build.
    pub fn push_status(&self, build_id: u64, state: WireState, trace: &str) -> PushOutcome {
        let request = UpdateBuildRequest {
            token: self.token.clone(),
            state,
            trace: trace.to_string(),
        };
        let path = paths::update_build(build_id);
        let attempts = self.config.push_attempts.max(1);

        for attempt in 1..=attempts {
            let failure = match self.send(HttpMethod::Put, &path, &request) {
                Ok(reply) if reply.is_success() => {
                    debug!(build_id, %state, "status pushed");
                    return PushOutcome::Success;
                }
                Ok(reply) if reply.status == 404 => {
                    info!(build_id, "coordinator no longer knows the build");
                    return PushOutcome::Aborted;
                }
                Ok(reply) => format!("coordinator answered {}", reply.status),
                Err(e) => e.to_string(),
            };

            if attempt < attempts {
                warn!(
                    build_id,
                    attempt,
                    max_attempts = attempts,
                    error = %failure,
                    "status push failed, retrying"
                );
                thread::sleep(self.config.push_retry_delay);
            } else {
                warn!(build_id, attempts, error = %failure, "status push failed");
            }
        }

        PushOutcome::Failed
    }
}
