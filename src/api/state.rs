//! Application state for the API server

use crate::AudioPipeline;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; the pipeline itself is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// The pipeline serving every request
    pub pipeline: AudioPipeline,
}

impl AppState {
    /// Create a new AppState
    pub fn new(pipeline: AudioPipeline) -> Self {
        Self { pipeline }
    }
}
