use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use facegate::config::Config;
use facegate::{server, AccessService, EMBEDDING_DIM};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> (tempfile::TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        data_dir: dir.path().to_path_buf(),
        audit_file: false,
        ..Config::default()
    };
    let service = Arc::new(AccessService::open(&cfg).unwrap());
    (dir, server::router(service))
}

fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; EMBEDDING_DIM];
    v[i] = 1.0;
    v
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(b) => Body::from(b.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (_dir, app) = app();
    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_enroll_and_recognize_flow() {
    let (_dir, app) = app();
    let enroll = "/api/embeddings?mode=enroll&partition=server";

    let (status, body) = call(&app, "POST", enroll, Some(json!({"embedding": axis(0), "name": "alice"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "partial", "count": 1, "remaining": 2}));

    let (_, body) = call(&app, "POST", enroll, Some(json!({"embedding": axis(0), "name": "alice"}))).await;
    assert_eq!(body, json!({"status": "partial", "count": 2, "remaining": 1}));

    let (_, pending) = call(&app, "GET", "/api/enrollments", None).await;
    assert_eq!(pending, json!([{"name": "alice", "count": 2}]));

    let (_, body) = call(&app, "POST", enroll, Some(json!({"embedding": axis(0), "name": "alice"}))).await;
    assert_eq!(body, json!({"status": "complete", "name": "alice"}));

    let (_, names) = call(&app, "GET", "/api/identities/server", None).await;
    assert_eq!(names, json!(["alice"]));

    let (status, body) = call(
        &app,
        "POST",
        "/api/embeddings?mode=recognize&partition=server",
        Some(json!({"embedding": axis(0)})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["name"], "alice");

    let (_, body) = call(
        &app,
        "POST",
        "/api/embeddings?mode=recognize",
        Some(json!({"embedding": axis(5)})),
    )
    .await;
    assert_eq!(body["status"], "rejected");

    let (_, results) = call(&app, "GET", "/api/results", None).await;
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["status"], "success");
    assert_eq!(results[1]["label"], "Unknown");
}

#[tokio::test]
async fn test_empty_store_is_distinct() {
    let (_dir, app) = app();
    let (status, body) = call(
        &app,
        "POST",
        "/api/embeddings?mode=recognize&partition=device",
        Some(json!({"embedding": axis(0)})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "empty_store"}));
}

#[tokio::test]
async fn test_validation_errors() {
    let (_dir, app) = app();
    let (status, body) = call(
        &app,
        "POST",
        "/api/embeddings?mode=enroll",
        Some(json!({"embedding": vec![0.5; 100], "name": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);

    let (status, _) = call(
        &app,
        "POST",
        "/api/embeddings?mode=enroll",
        Some(json!({"embedding": axis(0)})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "POST",
        "/api/embeddings?mode=recognize",
        Some(json!({"embedding": vec![0.0; EMBEDDING_DIM]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, pending) = call(&app, "GET", "/api/enrollments", None).await;
    assert_eq!(pending, json!([]));
}

#[tokio::test]
async fn test_device_partition_management() {
    let (_dir, app) = app();
    let enroll = "/api/embeddings?mode=enroll&partition=device";
    call(&app, "POST", enroll, Some(json!({"embedding": axis(1), "name": "Bob"}))).await;
    call(&app, "POST", enroll, Some(json!({"embedding": axis(2), "name": "carol"}))).await;

    let (_, dump) = call(&app, "GET", "/api/embeddings/device", None).await;
    assert_eq!(dump["bob"].as_array().unwrap().len(), EMBEDDING_DIM);
    assert_eq!(dump["carol"][2], 1.0);

    let (status, _) = call(&app, "DELETE", "/api/identities/device/dave", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, "DELETE", "/api/identities/device/bob", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "deleted", "name": "bob"}));

    let (status, _) = call(&app, "DELETE", "/api/identities/device", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, names) = call(&app, "GET", "/api/identities/device", None).await;
    assert_eq!(names, json!([]));
}

#[tokio::test]
async fn test_zero_vector_never_enrolled() {
    let (_dir, app) = app();
    let zero = vec![0.0; EMBEDDING_DIM];
    let (status, body) = call(
        &app,
        "POST",
        "/api/embeddings?mode=enroll&partition=device",
        Some(json!({"embedding": zero, "name": "zero"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);

    let (_, names) = call(&app, "GET", "/api/identities/device", None).await;
    assert_eq!(names, json!([]));
    let (_, body) = call(
        &app,
        "POST",
        "/api/embeddings?mode=recognize&partition=device",
        Some(json!({"embedding": axis(0)})),
    )
    .await;
    assert_eq!(body, json!({"status": "empty_store"}));
}

#[tokio::test]
async fn test_unknown_partition() {
    let (_dir, app) = app();
    let (status, _) = call(&app, "GET", "/api/identities/cloud", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_device_reported_results() {
    let (_dir, app) = app();
    let (status, body) = call(
        &app,
        "POST",
        "/api/results",
        Some(json!({"status": "success", "label": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["origin"], "device");
    let id = body["id"].as_u64().unwrap();

    let (status, _) = call(&app, "DELETE", &format!("/api/results/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "DELETE", &format!("/api/results/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    call(&app, "POST", "/api/results", Some(json!({"status": "error", "label": "Unknown"}))).await;
    let (status, _) = call(&app, "DELETE", "/api/results", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, results) = call(&app, "GET", "/api/results", None).await;
    assert_eq!(results, json!([]));
}

#[tokio::test]
async fn test_command_without_device() {
    let (_dir, app) = app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/commands")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("cmd=open"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let (_, log) = call(&app, "GET", "/api/commands", None).await;
    assert_eq!(log[0]["command"], "open");
    assert_eq!(log[0]["ok"], false);
}
