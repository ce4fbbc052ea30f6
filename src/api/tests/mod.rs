use super::*;
use crate::test_helpers::{FAKE_AUDIO, FakeMediaTools, FakeRecords, test_config};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

mod maintenance;
mod tracks;

const WAIT: Duration = Duration::from_secs(5);

struct TestApp {
    pipeline: AudioPipeline,
    records: Arc<FakeRecords>,
    tools: Arc<FakeMediaTools>,
    _dir: TempDir,
}

impl TestApp {
    fn router(&self) -> Router {
        create_router(self.pipeline.clone())
    }

    fn put_artifact(&self, name: &str) -> std::path::PathBuf {
        let path = self.pipeline.config().storage.media_dir.join(name);
        std::fs::write(&path, FAKE_AUDIO).unwrap();
        path
    }
}

async fn test_app_with(tools: FakeMediaTools, configure: impl FnOnce(&mut crate::Config)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    configure(&mut config);
    let records = Arc::new(FakeRecords::new());
    let tools = Arc::new(tools);
    let pipeline = AudioPipeline::new(config, records.clone(), tools.clone())
        .await
        .unwrap();
    TestApp {
        pipeline,
        records,
        tools,
        _dir: dir,
    }
}

async fn test_app() -> TestApp {
    test_app_with(FakeMediaTools::new(), |_| {}).await
}

/// Send a request with an empty body and decode the JSON response (Null when empty)
async fn send(app: Router, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_api_server_stops_with_pipeline() {
    let app = test_app_with(FakeMediaTools::new(), |config| {
        config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    })
    .await;

    let handle = app.pipeline.spawn_api_server();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    app.pipeline.shutdown().await.unwrap();

    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cors_enabled() {
    let app = test_app().await;

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_cors_specific_origins() {
    let app = test_app_with(FakeMediaTools::new(), |config| {
        config.api.cors_origins = vec!["http://catalog.local".to_string()];
    })
    .await;

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://catalog.local")
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();

    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "http://catalog.local"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let app = test_app_with(FakeMediaTools::new(), |config| {
        config.api.cors_enabled = false;
    })
    .await;

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();

    assert!(
        response
            .headers()
            .get("access-control-allow-origin")
            .is_none()
    );
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = test_app().await;
    let (status, _) = send(app.router(), Method::GET, "/downloads").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
