use super::*;
use crate::test_helpers::wait_for_status;
use crate::types::{AudioStatus, TrackId};

#[tokio::test]
async fn test_status_of_new_track_starts_download() {
    let app = test_app().await;
    app.records.insert(TrackId(1), Some("https://example.com/a"));

    let (status, body) = send(app.router(), Method::GET, "/tracks/1/audio/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    wait_for_status(app.pipeline.status_store(), TrackId(1), WAIT, |s| {
        *s == AudioStatus::Ready
    })
    .await;

    let (_, body) = send(app.router(), Method::GET, "/tracks/1/audio/status").await;
    assert_eq!(body, serde_json::json!({"status": "ready"}));

    let (status, body) = send(app.router(), Method::GET, "/tracks/1/audio/exists").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], true);
}

#[tokio::test]
async fn test_status_reports_error_details() {
    let app = test_app().await;
    app.records.insert(TrackId(2), Some("https://example.com/b"));
    app.pipeline
        .status_store()
        .set(TrackId(2), AudioStatus::cancelled())
        .await;

    let (status, body) = send(app.router(), Method::GET, "/tracks/2/audio/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["code"], "CANCELLED");
    assert_eq!(body["error"]["message"], "Download cancelled");
    assert_eq!(app.tools.fetch_calls(), 0);
}

#[tokio::test]
async fn test_status_with_invalid_id_is_rejected() {
    let app = test_app().await;
    let (status, _) = send(app.router(), Method::GET, "/tracks/abc/audio/status").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_retry_queues_download() {
    let app = test_app().await;
    app.records.insert(TrackId(3), Some("https://example.com/c"));
    app.pipeline
        .status_store()
        .set(TrackId(3), AudioStatus::cancelled())
        .await;

    let (status, body) = send(app.router(), Method::POST, "/tracks/3/audio/retry").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");

    wait_for_status(app.pipeline.status_store(), TrackId(3), WAIT, |s| {
        *s == AudioStatus::Ready
    })
    .await;
}

#[tokio::test]
async fn test_retry_unknown_record_is_404() {
    let app = test_app().await;

    let (status, body) = send(app.router(), Method::POST, "/tracks/99/audio/retry").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["error"]["details"]["track_id"], 99);
}

#[tokio::test]
async fn test_retry_without_source_is_404() {
    let app = test_app().await;
    app.records.insert(TrackId(4), None);

    let (status, body) = send(app.router(), Method::POST, "/tracks/4/audio/retry").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "no_source_ref");
}

#[tokio::test]
async fn test_retry_after_shutdown_is_503() {
    let app = test_app().await;
    app.records.insert(TrackId(5), Some("https://example.com/e"));
    app.pipeline.shutdown().await.unwrap();

    let (status, body) = send(app.router(), Method::POST, "/tracks/5/audio/retry").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "shutting_down");
}

#[tokio::test]
async fn test_cancel_running_download() {
    let app = test_app_with(FakeMediaTools::new().hanging(), |_| {}).await;
    app.records.insert(TrackId(6), Some("https://example.com/f"));
    app.pipeline.retry(TrackId(6)).await.unwrap();
    wait_for_status(app.pipeline.status_store(), TrackId(6), WAIT, |s| {
        matches!(s, AudioStatus::Downloading { .. })
    })
    .await;

    let (status, body) = send(app.router(), Method::DELETE, "/tracks/6/audio/download").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"]["code"], "CANCELLED");
    assert!(!app.pipeline.queue().contains(TrackId(6)).await);
}

#[tokio::test]
async fn test_delete_audio_removes_artifact() {
    let app = test_app().await;
    let path = app.put_artifact("7.opus");
    app.pipeline
        .status_store()
        .set(TrackId(7), AudioStatus::Ready)
        .await;

    let (status, body) = send(app.router(), Method::DELETE, "/tracks/7/audio").await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, serde_json::Value::Null);
    assert!(!path.exists());
    assert!(
        app.pipeline
            .status_store()
            .snapshot()
            .get(&TrackId(7))
            .is_none()
    );

    let (_, body) = send(app.router(), Method::GET, "/tracks/7/audio/exists").await;
    assert_eq!(body["exists"], false);
}

#[tokio::test]
async fn test_source_change_fetches_again() {
    let app = test_app().await;
    app.records.insert(TrackId(8), Some("https://example.com/new"));
    app.put_artifact("8.m4a");

    let (status, body) = send(app.router(), Method::POST, "/tracks/8/audio/source").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");

    wait_for_status(app.pipeline.status_store(), TrackId(8), WAIT, |s| {
        *s == AudioStatus::Ready
    })
    .await;
    assert!(!app.pipeline.config().storage.media_dir.join("8.m4a").exists());
    assert!(app.pipeline.artifact_exists(TrackId(8)).await);
    assert_eq!(app.tools.sources(), vec!["https://example.com/new"]);
}
