//! Runner Protocol Types
//!
//! Defines the JSON payloads exchanged between a build runner and the CI
//! coordinator (API v1).

pub mod error;
pub mod job;
pub mod request;
pub mod response;
pub mod state;

pub use error::ProtocolError;
pub use job::JobDescriptor;
pub use request::{RegisterRunnerRequest, RequestBuildRequest, UpdateBuildRequest};
pub use response::RegisterRunnerResponse;
pub use state::WireState;

/// Path prefix of the coordinator API relative to its base URL.
pub const API_PREFIX: &str = "/api/v1";

/// Endpoint paths, relative to [`API_PREFIX`].
pub mod paths {
    /// Runner registration (POST).
    pub const REGISTER_RUNNER: &str = "/runners/register.json";
    /// Request a pending build (POST).
    pub const REQUEST_BUILD: &str = "/builds/register.json";

    /// Build status update (PUT).
    pub fn update_build(build_id: u64) -> String {
        format!("/builds/{}.json", build_id)
    }
}
