//! Queue inspection handlers.

use crate::api::AppState;
use crate::types::QueueSnapshot;
use axum::{Json, extract::State};

/// GET /queue - Queued jobs in order plus the executing one
#[utoipa::path(
    get,
    path = "/queue",
    tag = "queue",
    responses(
        (status = 200, description = "Queue snapshot", body = QueueSnapshot)
    )
)]
pub async fn get_queue(State(state): State<AppState>) -> Json<QueueSnapshot> {
    Json(state.pipeline.queue().snapshot().await)
}
