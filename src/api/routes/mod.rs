//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`tracks`] - per-track audio status, retry, cancel, removal
//! - [`maintenance`] - retention sweeps, disk space, activity log
//! - [`queue`] - queue inspection
//! - [`system`] - health, events, OpenAPI

use serde::{Deserialize, Serialize};

mod maintenance;
mod queue;
mod system;
mod tracks;

pub use maintenance::*;
pub use queue::*;
pub use system::*;
pub use tracks::*;

/// Default number of entries returned by GET /logs
pub const DEFAULT_LOG_LIMIT: usize = 200;

/// Upper bound on entries returned by GET /logs
pub const MAX_LOG_LIMIT: usize = 5000;

/// Query parameters for GET /logs
#[derive(Debug, Deserialize, Serialize, utoipa::IntoParams, utoipa::ToSchema)]
#[into_params(parameter_in = Query)]
pub struct LogsQuery {
    /// Maximum number of entries, newest last (default: 200)
    pub limit: Option<usize>,
}

/// Response body of GET /tracks/{id}/audio/exists
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ExistsResponse {
    /// Whether an audio artifact is on disk
    pub exists: bool,
}
