//! Event Bridge API
//!
//! HTTP endpoints for:
//! - Event ingestion (`POST /events`)
//! - Rule and workflow listing
//! - Health and Prometheus metrics

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use eb_common::{DispatchRule, HttpMethod, InboundEvent, ParamValue};
use eb_workflow::{EventProcessor, OutcomeSummary, Stage};
use indexmap::IndexMap;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<EventProcessor>,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleResponse {
    pub name: String,
    pub source: String,
    pub event_type: String,
    pub method: HttpMethod,
    pub path: String,
    pub query: IndexMap<String, ParamValue>,
    pub path_params: Vec<ParamValue>,
    pub notify: bool,
}

impl From<&DispatchRule> for RuleResponse {
    fn from(rule: &DispatchRule) -> Self {
        RuleResponse {
            name: rule.name.clone(),
            source: rule.event_source.clone(),
            event_type: rule.event_type.clone(),
            method: rule.method,
            path: rule.path_template.clone(),
            query: rule.query_mapping.clone(),
            path_params: rule.path_param_values.clone(),
            notify: rule.notify,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResponse {
    pub id: String,
    pub rule: String,
    pub steps: Vec<Stage>,
}

/// Create the router with all endpoints
pub fn create_router(processor: Arc<EventProcessor>, metrics: Option<PrometheusHandle>) -> Router {
    let state = AppState { processor, metrics };

    Router::new()
        .route("/events", post(ingest_event))
        .route("/rules", get(list_rules))
        .route("/workflows", get(list_workflows))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<InboundEvent>,
) -> (StatusCode, Json<OutcomeSummary>) {
    debug!(event_id = %event.id, source = %event.source, event_type = %event.event_type, "Event received");

    let summary = state.processor.process(&event).await.summary();
    (outcome_status(&summary), Json(summary))
}

fn outcome_status(summary: &OutcomeSummary) -> StatusCode {
    match (summary.status, summary.acknowledged, summary.error_kind) {
        ("unroutable", _, _) => StatusCode::NOT_FOUND,
        (_, true, _) => StatusCode::ACCEPTED,
        (_, false, Some("Cancelled")) => StatusCode::SERVICE_UNAVAILABLE,
        (_, false, _) => StatusCode::BAD_GATEWAY,
    }
}

async fn list_rules(State(state): State<AppState>) -> Json<Vec<RuleResponse>> {
    let registry = state.processor.router().registry();
    Json(registry.list().map(RuleResponse::from).collect())
}

async fn list_workflows(State(state): State<AppState>) -> Json<Vec<WorkflowResponse>> {
    let workflows = state
        .processor
        .workflows()
        .iter()
        .map(|w| WorkflowResponse {
            id: w.id().to_string(),
            rule: w.rule().name.clone(),
            steps: w.steps().to_vec(),
        })
        .collect();
    Json(workflows)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
