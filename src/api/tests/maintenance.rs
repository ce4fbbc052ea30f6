use super::*;
use crate::test_helpers::wait_for_status;
use crate::types::{AudioStatus, TrackId};

#[tokio::test]
async fn test_sweep_deletes_orphans_and_heals() {
    let app = test_app().await;
    let orphan = app.put_artifact("1.opus");
    let kept = app.put_artifact("2.opus");
    app.records.insert(TrackId(2), Some("https://example.com/b"));

    let (status, body) = send(app.router(), Method::POST, "/maintenance/sweep").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scanned"], 2);
    assert_eq!(body["orphaned"], 1);
    assert_eq!(body["healed"], 1);
    assert_eq!(body["expired"], 0);
    assert!(!orphan.exists());
    assert!(kept.exists());
    assert_eq!(app.pipeline.status_store().get(TrackId(2)), AudioStatus::Ready);
}

#[tokio::test]
async fn test_disk_space_reports_media_filesystem() {
    let app = test_app().await;

    let (status, body) = send(app.router(), Method::GET, "/maintenance/disk").await;

    assert_eq!(status, StatusCode::OK);
    let total = body["total"].as_u64().unwrap();
    let available = body["available"].as_u64().unwrap();
    assert!(total > 0);
    assert!(available <= total);
}

#[tokio::test]
async fn test_logs_return_recent_activity() {
    let app = test_app().await;
    app.records.insert(TrackId(3), Some("https://example.com/c"));
    app.pipeline.retry(TrackId(3)).await.unwrap();
    wait_for_status(app.pipeline.status_store(), TrackId(3), WAIT, |s| {
        *s == AudioStatus::Ready
    })
    .await;
    crate::test_helpers::wait_until_idle(app.pipeline.queue(), WAIT).await;

    let (status, body) = send(app.router(), Method::GET, "/logs").await;
    assert_eq!(status, StatusCode::OK);
    let messages: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["message"].as_str().unwrap())
        .collect();
    assert_eq!(
        messages,
        vec!["Queued for download", "Download started", "Download completed"]
    );
    assert_eq!(body[0]["trackId"], 3);
    assert_eq!(body[0]["level"], "info");

    let (_, body) = send(app.router(), Method::GET, "/logs?limit=1").await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["message"], "Download completed");
}

#[tokio::test]
async fn test_logs_empty_when_nothing_happened() {
    let app = test_app().await;

    let (status, body) = send(app.router(), Method::GET, "/logs").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));
}

#[tokio::test]
async fn test_queue_snapshot_shows_active_job() {
    let app = test_app_with(FakeMediaTools::new().hanging(), |_| {}).await;
    app.records.insert(TrackId(4), Some("https://example.com/d"));
    app.records.insert(TrackId(5), Some("https://example.com/e"));
    app.pipeline.retry(TrackId(4)).await.unwrap();
    app.pipeline.retry(TrackId(5)).await.unwrap();
    wait_for_status(app.pipeline.status_store(), TrackId(4), WAIT, |s| {
        matches!(s, AudioStatus::Downloading { .. })
    })
    .await;

    let (status, body) = send(app.router(), Method::GET, "/queue").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], 4);
    let ids: Vec<i64> = body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![4, 5]);
    assert_eq!(body["jobs"][1]["source_ref"], "https://example.com/e");
}
