//! Maintenance handlers: sweeps, disk space, activity log.

use crate::activity_log::LogEntry;
use crate::api::AppState;
use crate::error::Result;
use crate::types::{DiskSpace, SweepReport};
use axum::{
    Json,
    extract::{Query, State},
};

use super::{DEFAULT_LOG_LIMIT, LogsQuery, MAX_LOG_LIMIT};

/// POST /maintenance/sweep - Run a retention sweep now
#[utoipa::path(
    post,
    path = "/maintenance/sweep",
    tag = "maintenance",
    responses(
        (status = 200, description = "Sweep finished", body = SweepReport),
        (status = 500, description = "Media directory could not be read", body = crate::error::ApiError)
    )
)]
pub async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>> {
    let report = state.pipeline.retention().sweep().await?;
    Ok(Json(report))
}

/// GET /maintenance/disk - Capacity of the filesystem holding the media directory
#[utoipa::path(
    get,
    path = "/maintenance/disk",
    tag = "maintenance",
    responses(
        (status = 200, description = "Disk space figures in bytes", body = DiskSpace),
        (status = 500, description = "Disk space check failed", body = crate::error::ApiError)
    )
)]
pub async fn disk_space(State(state): State<AppState>) -> Result<Json<DiskSpace>> {
    let space = state.pipeline.disk_guard().disk_space().await?;
    Ok(Json(space))
}

/// GET /logs - Recent activity log entries, oldest first
#[utoipa::path(
    get,
    path = "/logs",
    tag = "maintenance",
    params(LogsQuery),
    responses(
        (status = 200, description = "Activity log entries", body = Vec<LogEntry>),
        (status = 500, description = "Log could not be read", body = crate::error::ApiError)
    )
)]
pub async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<LogEntry>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .min(MAX_LOG_LIMIT);
    let entries = state.pipeline.activity().recent(limit).await?;
    Ok(Json(entries))
}
