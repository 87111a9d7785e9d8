//! API Endpoint Tests
//!
//! Tests for:
//! - Event ingestion and outcome status codes
//! - Rule and workflow listing
//! - Health and metrics endpoints

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use eb_common::{
    BackendRequest, BackendResponse, BridgeError, DispatchRule, HttpMethod, RegistryConfig, Result,
};
use eb_router::{BackendClient, EventRouter, RuleRegistry};
use eb_workflow::{EventProcessor, MemorySink, WorkflowBuilder, WorkflowExecutor};

use eb_api::create_router;

/// Mock backend recording every call; `/down` paths fail
struct MockBackend {
    calls: parking_lot::Mutex<Vec<BackendRequest>>,
}

impl MockBackend {
    fn new() -> Self {
        Self {
            calls: parking_lot::Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn call(&self, request: &BackendRequest) -> Result<BackendResponse> {
        self.calls.lock().push(request.clone());
        if request.path == "/down" {
            return Err(BridgeError::backend(None, "connection refused"));
        }
        let mut headers = BTreeMap::new();
        headers.insert("date".to_string(), vec!["Tue, 01 Oct 2024 10:00:00 GMT".to_string()]);
        Ok(BackendResponse {
            status_code: 200,
            status_text: Some("OK".to_string()),
            headers,
            body: r#"{"status":"ok"}"#.to_string(),
        })
    }
}

fn create_test_app() -> (axum::Router, Arc<MockBackend>, Arc<MemorySink>) {
    let mut registry = RuleRegistry::new(RegistryConfig::new("quilt.pkg"));
    registry
        .register(
            DispatchRule::new("health", "quilt.pkg", "GetHealth", HttpMethod::Get, "/health")
                .with_notify(true),
        )
        .unwrap();
    registry
        .register(
            DispatchRule::new(
                "create_package",
                "quilt.pkg",
                "CreatePackage",
                HttpMethod::Post,
                "/registries/{bucket}/packages",
            )
            .with_path_params(["$.detail.bucket_name"])
            .with_query("s3_folder", "$.detail.s3_folder"),
        )
        .unwrap();
    registry
        .register(DispatchRule::new("down", "quilt.pkg", "GoDown", HttpMethod::Get, "/down"))
        .unwrap();
    let registry = Arc::new(registry);

    let backend = Arc::new(MockBackend::new());
    let sink = Arc::new(MemorySink::new());
    let workflows = Arc::new(WorkflowBuilder::default().build_all(&registry).unwrap());
    let router = Arc::new(EventRouter::new(registry, backend.clone(), Duration::from_secs(5)));
    let executor = Arc::new(WorkflowExecutor::new(
        router.clone(),
        sink.clone(),
        Duration::from_secs(5),
    ));
    let processor = Arc::new(EventProcessor::new(router, workflows, executor));

    (create_router(processor, None), backend, sink)
}

async fn get_body_json(body: Body) -> serde_json::Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_event(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/events")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ============================================================================
// Health Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _, _) = create_test_app();

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["status"], "UP");
}

#[tokio::test]
async fn test_metrics_without_recorder() {
    let (app, _, _) = create_test_app();

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Listing Tests
// ============================================================================

#[tokio::test]
async fn test_list_rules_in_registration_order() {
    let (app, _, _) = create_test_app();

    let response = app.oneshot(get("/rules")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response.into_body()).await;
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["health", "create_package", "down"]);
    assert_eq!(json[1]["method"], "POST");
    assert_eq!(json[1]["path"], "/registries/{bucket}/packages");
    assert_eq!(json[1]["pathParams"][0], "$.detail.bucket_name");
    assert_eq!(json[1]["query"]["s3_folder"], "$.detail.s3_folder");
}

#[tokio::test]
async fn test_list_workflows() {
    let (app, _, _) = create_test_app();

    let response = app.oneshot(get("/workflows")).await.unwrap();

    let json = get_body_json(response.into_body()).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["id"], "GetHealthWorkflow");
    assert_eq!(json[0]["steps"], serde_json::json!(["CallBackend", "PublishNotification"]));
}

// ============================================================================
// Event Ingestion Tests
// ============================================================================

#[tokio::test]
async fn test_getter_event_runs_workflow() {
    let (app, backend, sink) = create_test_app();

    let response = app
        .oneshot(post_event(serde_json::json!({
            "source": "quilt.pkg",
            "detail-type": "GetHealth",
            "detail": {}
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["status"], "completed");
    assert_eq!(json["workflow"], "GetHealthWorkflow");
    assert_eq!(json["acknowledged"], true);
    assert_eq!(backend.call_count(), 1);
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn test_routed_event_dispatches() {
    let (app, backend, sink) = create_test_app();

    let response = app
        .oneshot(post_event(serde_json::json!({
            "source": "quilt.pkg",
            "type": "CreatePackage",
            "detail": {"bucket_name": "b1", "s3_folder": "f1"}
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["status"], "dispatched");
    assert_eq!(json["rule"], "create_package");

    let calls = backend.calls.lock();
    assert_eq!(calls[0].path_and_query(), "/registries/b1/packages?s3_folder=f1");
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_missing_path_parameter_is_acknowledged() {
    let (app, backend, _) = create_test_app();

    let response = app
        .oneshot(post_event(serde_json::json!({
            "source": "quilt.pkg",
            "type": "CreatePackage",
            "detail": {}
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["status"], "failed");
    assert_eq!(json["errorKind"], "MissingPathParameter");
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_backend_failure_returns_bad_gateway() {
    let (app, _, _) = create_test_app();

    let response = app
        .oneshot(post_event(serde_json::json!({
            "source": "quilt.pkg",
            "type": "GoDown"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["errorKind"], "BackendCallFailure");
    assert_eq!(json["acknowledged"], false);
}

#[tokio::test]
async fn test_unroutable_event_returns_not_found() {
    let (app, backend, _) = create_test_app();

    let response = app
        .oneshot(post_event(serde_json::json!({
            "source": "other.app",
            "type": "GetHealth"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_event_body_rejected() {
    let (app, _, _) = create_test_app();

    let response = app
        .oneshot(post_event(serde_json::json!({"source": "quilt.pkg"})))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}
