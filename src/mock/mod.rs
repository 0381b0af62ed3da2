//! Mock Coordinator
//!
//! In-process stand-in for the CI coordinator, used by client and
//! scheduler tests through [`MockTransport`](crate::client::MockTransport).
//!
//! # Endpoints
//!
//! - `POST /runners/register.json`: exchange a registration token for a runner token
//! - `POST /builds/register.json`: hand out the next queued job, 204 when idle
//! - `PUT /builds/{id}.json`: record state and trace, 404 once the build is dropped

mod coordinator;
mod failure;

pub use coordinator::{MockCoordinator, RecordedRequest};
pub use failure::{FailureConfig, FailureInjector};

/// Coordinator endpoint, for failure injection and request records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    RegisterRunner,
    RequestBuild,
    UpdateBuild,
}
