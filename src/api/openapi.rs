//! OpenAPI documentation and schema generation

use utoipa::OpenApi;

/// OpenAPI documentation for the track-fetch REST API
///
/// Served as JSON at `/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "track-fetch REST API",
        version = "0.1.0",
        description = "Audio acquisition for catalog records: status, retries, cancellation, retention and activity",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790", description = "Local development server")
    ),
    paths(
        // Tracks
        crate::api::routes::get_audio_status,
        crate::api::routes::retry_audio,
        crate::api::routes::cancel_download,
        crate::api::routes::delete_audio,
        crate::api::routes::source_changed,
        crate::api::routes::audio_exists,

        // Maintenance
        crate::api::routes::run_sweep,
        crate::api::routes::disk_space,
        crate::api::routes::get_logs,

        // Queue
        crate::api::routes::get_queue,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::event_stream,
    ),
    components(
        schemas(
            crate::types::TrackId,
            crate::types::StatusResponse,
            crate::types::StatusKind,
            crate::types::StatusError,
            crate::types::ErrorCode,
            crate::types::QueuedJob,
            crate::types::QueueSnapshot,
            crate::types::DiskSpace,
            crate::types::SweepReport,
            crate::activity_log::LogEntry,
            crate::activity_log::LogLevel,
            crate::api::routes::ExistsResponse,
            crate::api::routes::LogsQuery,
            crate::error::ApiError,
            crate::error::ErrorDetail,
        )
    ),
    tags(
        (name = "tracks", description = "Per-track audio lifecycle"),
        (name = "maintenance", description = "Retention sweeps, disk space and the activity log"),
        (name = "queue", description = "Download queue inspection"),
        (name = "system", description = "Health, OpenAPI and status events")
    )
)]
pub struct ApiDoc;
