//! Transport Layer for the Coordinator Client
//!
//! Abstracts HTTP for testability. Provides:
//! - Transport trait: one JSON request, one status + body reply
//! - HttpTransport: blocking reqwest client for production
//! - MockTransport: in-process mock coordinator for tests

use std::fmt;
use std::time::Duration;

use runner_protocol::API_PREFIX;
use serde_json::Value;

use crate::mock::MockCoordinator;

/// HTTP method used by the coordinator API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
    Put,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        })
    }
}

/// Raw reply from the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport trait for coordinator requests
pub trait Transport: Send + Sync {
    /// Send `body` as JSON to `path` (relative to the API prefix)
    fn send(&self, method: HttpMethod, path: &str, body: &Value) -> Result<HttpReply, TransportError>;
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Invalid coordinator URL: {0}")]
    InvalidUrl(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Mock transport for testing - connects directly to a MockCoordinator in-process
#[derive(Clone, Default)]
pub struct MockTransport {
    coordinator: MockCoordinator,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport talking to a pre-configured coordinator
    pub fn with_coordinator(coordinator: MockCoordinator) -> Self {
        Self { coordinator }
    }

    /// The underlying coordinator, for test configuration and inspection
    pub fn coordinator(&self) -> &MockCoordinator {
        &self.coordinator
    }
}

impl Transport for MockTransport {
    fn send(&self, method: HttpMethod, path: &str, body: &Value) -> Result<HttpReply, TransportError> {
        self.coordinator.handle(method, path, body)
    }
}

/// HTTP transport for production use
pub struct HttpTransport {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// `base_url` is the coordinator root, without the API prefix.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(TransportError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ci-runner/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            base_url: base_url.to_string(),
            client,
        })
    }

    /// Full URL of an endpoint path
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }
}

impl Transport for HttpTransport {
    fn send(&self, method: HttpMethod, path: &str, body: &Value) -> Result<HttpReply, TransportError> {
        let url = self.url_for(path);
        let request = match method {
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
        };

        let response = request.json(body).send().map_err(|e| {
            if e.is_timeout() {
                TransportError::ConnectionTimeout
            } else {
                TransportError::ConnectionFailed(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().map_err(|e| {
            if e.is_timeout() {
                TransportError::ConnectionTimeout
            } else {
                TransportError::ConnectionFailed(e.to_string())
            }
        })?;

        Ok(HttpReply { status, body })
    }
}
