//! REST API server module
//!
//! Exposes the pipeline to the web application: per-track status with
//! self-repair, retry and cancel, record hooks, maintenance, the activity log
//! and a server-sent event stream of status changes.

use crate::{AudioPipeline, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Tracks
/// - `GET /tracks/:id/audio/status` - Audio status (repairs drift, may start a download)
/// - `POST /tracks/:id/audio/retry` - Reset and download again
/// - `DELETE /tracks/:id/audio/download` - Cancel a queued or running download
/// - `DELETE /tracks/:id/audio` - Record deleted: remove audio and status
/// - `POST /tracks/:id/audio/source` - Record source changed: fetch again
/// - `GET /tracks/:id/audio/exists` - Whether an artifact is on disk
///
/// ## Maintenance
/// - `POST /maintenance/sweep` - Run a retention sweep
/// - `GET /maintenance/disk` - Disk space of the media directory
/// - `GET /logs` - Recent activity log entries
///
/// ## Queue
/// - `GET /queue` - Queue snapshot
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /events` - Server-sent events stream
pub fn create_router(pipeline: AudioPipeline) -> Router {
    let api = pipeline.config().api.clone();
    let state = AppState::new(pipeline);

    let router = Router::new()
        // Tracks
        .route("/tracks/:id/audio/status", get(routes::get_audio_status))
        .route("/tracks/:id/audio/retry", post(routes::retry_audio))
        .route("/tracks/:id/audio/download", delete(routes::cancel_download))
        .route("/tracks/:id/audio", delete(routes::delete_audio))
        .route("/tracks/:id/audio/source", post(routes::source_changed))
        .route("/tracks/:id/audio/exists", get(routes::audio_exists))
        // Maintenance
        .route("/maintenance/sweep", post(routes::run_sweep))
        .route("/maintenance/disk", get(routes::disk_space))
        .route("/logs", get(routes::get_logs))
        // Queue
        .route("/queue", get(routes::get_queue))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec))
        .route("/events", get(routes::event_stream))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if api.cors_enabled {
        router.layer(build_cors_layer(&api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Serve the API on the configured bind address until the pipeline shuts down
///
/// # Example
///
/// ```no_run
/// use track_fetch::{AudioPipeline, Config};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = AudioPipeline::connect(Config::default()).await?;
///
/// // Blocks until pipeline.shutdown() is called elsewhere
/// track_fetch::api::start_api_server(pipeline).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(pipeline: AudioPipeline) -> Result<()> {
    let bind_address = pipeline.config().api.bind_address;
    let shutdown = pipeline.shutdown.clone();

    tracing::info!(address = %bind_address, "Starting API server");

    let app = create_router(pipeline);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(address = %bind_address, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
