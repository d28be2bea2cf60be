// ABOUTME: Integration tests for the HTTP surface using the stub runtime
// ABOUTME: Drives the router directly with tower's oneshot, no server or Docker

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crucible_api::{create_router, AppState};
use crucible_sandboxes::test_utils::StubRuntime;
use crucible_sandboxes::{ControlPlane, ControlPlaneOptions, KernelLauncher};

async fn test_app(dir: &tempfile::TempDir) -> Router {
    let pool = sqlx::SqlitePool::connect(":memory:")
        .await
        .expect("Failed to create in-memory database");

    let options = ControlPlaneOptions {
        kernel_image: "crucible-node:latest".to_string(),
        data_dir: dir.path().join("data"),
        // Metadata routes never spawn an interpreter, so a dangling
        // driver path is fine here
        launcher: KernelLauncher::with_command("sh", dir.path().join("missing.sh")),
    };

    let control = ControlPlane::new(pool, Arc::new(StubRuntime::new()), options)
        .await
        .expect("Failed to build control plane");

    create_router(AppState::new(Arc::new(control)))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        json!(null)
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    (status, value)
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_sandbox_lifecycle_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;

    // Create
    let (status, body) = send(&app, Method::POST, "/containers", None).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["container_id"].as_str().unwrap().to_string();

    // Get
    let (status, body) = send(&app, Method::GET, &format!("/containers/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("running"));

    // List includes it
    let (status, body) = send(&app, Method::GET, "/containers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get(&id).is_some());

    // Delete, then delete again
    let (status, body) =
        send(&app, Method::DELETE, &format!("/containers/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("deleted"));

    let (status, body) =
        send(&app, Method::DELETE, &format!("/containers/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("NOT_FOUND"));

    let (status, _) = send(&app, Method::GET, &format!("/containers/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_environment_routes() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;

    let (_, body) = send(&app, Method::POST, "/containers", None).await;
    let id = body["container_id"].as_str().unwrap().to_string();

    // Create env
    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/containers/{}/envs", id),
        Some(json!({"env_id": "env1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"env_id": "env1", "status": "created"}));

    // Creating an env in a missing sandbox is a 404
    let (status, _) = send(
        &app,
        Method::POST,
        "/containers/ghost/envs",
        Some(json!({"env_id": "env1"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // List
    let (status, body) =
        send(&app, Method::GET, &format!("/containers/{}/envs", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["envs"], json!(["env1"]));

    // Delete, then delete again
    let (status, body) = send(
        &app,
        Method::DELETE,
        &format!("/containers/{}/envs/env1", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("deleted"));

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/containers/{}/envs/env1", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_execute_against_missing_environment_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;

    let (_, body) = send(&app, Method::POST, "/containers", None).await;
    let id = body["container_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/containers/{}/envs/ghost/execute", id),
        Some(json!({"code": "x = 1"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("NOT_FOUND"));

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/containers/{}/envs/ghost/restart", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/containers/{}/envs/ghost/interrupt", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_interrupt_idle_environment_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir).await;

    let (_, body) = send(&app, Method::POST, "/containers", None).await;
    let id = body["container_id"].as_str().unwrap().to_string();

    send(
        &app,
        Method::POST,
        &format!("/containers/{}/envs", id),
        Some(json!({"env_id": "env1"})),
    )
    .await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/containers/{}/envs/env1/interrupt", id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"env_id": "env1", "status": "interrupted"}));
}
