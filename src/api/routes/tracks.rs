//! Per-track audio handlers.

use crate::api::AppState;
use crate::error::Result;
use crate::types::{StatusResponse, TrackId};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use super::ExistsResponse;

/// GET /tracks/{id}/audio/status - Audio status, repairing drift
///
/// A missing artifact behind a ready or interrupted status is downloaded
/// again; an artifact on disk behind a stale status is marked ready.
#[utoipa::path(
    get,
    path = "/tracks/{id}/audio/status",
    tag = "tracks",
    params(
        ("id" = i64, Path, description = "Track ID")
    ),
    responses(
        (status = 200, description = "Current audio status", body = StatusResponse)
    )
)]
pub async fn get_audio_status(
    State(state): State<AppState>,
    Path(id): Path<TrackId>,
) -> Json<StatusResponse> {
    Json(state.pipeline.status(id).await)
}

/// POST /tracks/{id}/audio/retry - Reset and download again
#[utoipa::path(
    post,
    path = "/tracks/{id}/audio/retry",
    tag = "tracks",
    params(
        ("id" = i64, Path, description = "Track ID")
    ),
    responses(
        (status = 202, description = "Download queued", body = StatusResponse),
        (status = 404, description = "Record missing or without a source", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn retry_audio(
    State(state): State<AppState>,
    Path(id): Path<TrackId>,
) -> Result<(StatusCode, Json<StatusResponse>)> {
    let status = state.pipeline.retry(id).await?;
    Ok((StatusCode::ACCEPTED, Json(status.into())))
}

/// DELETE /tracks/{id}/audio/download - Cancel a queued or running download
#[utoipa::path(
    delete,
    path = "/tracks/{id}/audio/download",
    tag = "tracks",
    params(
        ("id" = i64, Path, description = "Track ID")
    ),
    responses(
        (status = 200, description = "Download cancelled", body = StatusResponse)
    )
)]
pub async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<TrackId>,
) -> Json<StatusResponse> {
    state.pipeline.cancel(id).await;
    Json(state.pipeline.status_store().get(id).into())
}

/// DELETE /tracks/{id}/audio - Delete the artifact and forget the track
///
/// Called when the record itself is deleted.
#[utoipa::path(
    delete,
    path = "/tracks/{id}/audio",
    tag = "tracks",
    params(
        ("id" = i64, Path, description = "Track ID")
    ),
    responses(
        (status = 204, description = "Audio removed"),
        (status = 500, description = "Artifact could not be deleted", body = crate::error::ApiError)
    )
)]
pub async fn delete_audio(
    State(state): State<AppState>,
    Path(id): Path<TrackId>,
) -> Result<StatusCode> {
    state.pipeline.remove_track(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /tracks/{id}/audio/source - The record's source changed; fetch again
#[utoipa::path(
    post,
    path = "/tracks/{id}/audio/source",
    tag = "tracks",
    params(
        ("id" = i64, Path, description = "Track ID")
    ),
    responses(
        (status = 202, description = "Old audio discarded, new download queued", body = StatusResponse),
        (status = 404, description = "Record not found", body = crate::error::ApiError)
    )
)]
pub async fn source_changed(
    State(state): State<AppState>,
    Path(id): Path<TrackId>,
) -> Result<(StatusCode, Json<StatusResponse>)> {
    let status = state.pipeline.source_changed(id).await?;
    Ok((StatusCode::ACCEPTED, Json(status.into())))
}

/// GET /tracks/{id}/audio/exists - Whether an artifact is on disk
#[utoipa::path(
    get,
    path = "/tracks/{id}/audio/exists",
    tag = "tracks",
    params(
        ("id" = i64, Path, description = "Track ID")
    ),
    responses(
        (status = 200, description = "Artifact presence", body = ExistsResponse)
    )
)]
pub async fn audio_exists(
    State(state): State<AppState>,
    Path(id): Path<TrackId>,
) -> Json<ExistsResponse> {
    Json(ExistsResponse {
        exists: state.pipeline.artifact_exists(id).await,
    })
}
