//! Pooltune HTTP API
//!
//! HTTP API endpoints for:
//! - Pool snapshots
//! - Manual resizing of pools and queues
//! - Starting, stopping and triggering tuning
//! - Health and Prometheus metrics

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use pt_common::{PoolBounds, PoolSizing, PoolSnapshot};
use pt_tuner::{CycleOutcome, PoolController, TunerError};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<PoolController>,
    /// Prometheus handle (absent when metrics export is disabled)
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always UP while the server is serving
    pub status: String,
    pub version: String,
    /// Registered pools
    pub pools: usize,
    /// Pools with active tuning
    pub tuning_active: usize,
}

/// Requested core/max sizing. Values are clamped into the pool bounds.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AdjustRequest {
    pub core: i64,
    pub max: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdjustResponse {
    pub pool: String,
    /// Sizing actually applied
    pub applied: PoolSizing,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct QueueCapacityRequest {
    pub capacity: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QueueCapacityResponse {
    pub pool: String,
    /// Capacity actually applied
    pub capacity: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TuningStatusResponse {
    pub pool: String,
    pub active: bool,
    /// Whether this request changed the tuning state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
    pub last_applied: Option<PoolSizing>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TuneNowResponse {
    pub pool: String,
    /// applied or skipped
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<PoolSizing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<PoolSizing>,
}

impl TuneNowResponse {
    fn from_outcome(pool: String, outcome: CycleOutcome) -> Self {
        match outcome {
            CycleOutcome::Applied { before, after } => Self {
                pool,
                outcome: "applied".to_string(),
                reason: None,
                before: Some(before),
                after: Some(after),
            },
            CycleOutcome::Skipped { reason } => Self {
                pool,
                outcome: "skipped".to_string(),
                reason: Some(reason.as_str().to_string()),
                before: None,
                after: None,
            },
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pooltune Control API",
        version = "0.1.0",
        description = "HTTP API for inspecting and tuning worker pools"
    ),
    paths(
        health_handler,
        metrics_handler,
        list_pools,
        get_pool,
        adjust_pool,
        resize_queue,
        start_tuning,
        stop_tuning,
        tuning_status,
        tune_now,
    ),
    components(schemas(
        HealthResponse,
        AdjustRequest,
        AdjustResponse,
        QueueCapacityRequest,
        QueueCapacityResponse,
        TuningStatusResponse,
        TuneNowResponse,
        PoolSnapshot,
        PoolBounds,
        PoolSizing,
    )),
    tags(
        (name = "pools", description = "Pool inspection and sizing"),
        (name = "tuning", description = "Tuning control"),
        (name = "monitoring", description = "Health and metrics"),
    )
)]
pub struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/pools", get(list_pools))
        .route("/pools/:name", get(get_pool))
        .route("/pools/:name/adjust", post(adjust_pool))
        .route("/pools/:name/queue-capacity", post(resize_queue))
        .route("/pools/:name/tuning", get(tuning_status))
        .route("/pools/:name/tuning/start", post(start_tuning))
        .route("/pools/:name/tuning/stop", post(stop_tuning))
        .route("/pools/:name/tune-now", post(tune_now))
        .with_state(state)
}

/// Map a tuner error to a JSON error response
fn error_response(e: TunerError) -> Response {
    let status = match &e {
        TunerError::NotFound(_) => StatusCode::NOT_FOUND,
        TunerError::DuplicateName(_) => StatusCode::CONFLICT,
        TunerError::InvalidBounds { .. } | TunerError::QueueNotResizable(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %e, "Request failed");
    }
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

/// Basic health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "monitoring",
    responses(
        (status = 200, description = "Health status", body = HealthResponse)
    )
)]
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pools: state.controller.registry().len(),
        tuning_active: state.controller.scheduler().active_pools().len(),
    })
}

/// Prometheus metrics in text exposition format
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "monitoring",
    responses(
        (status = 200, description = "Prometheus metrics", content_type = "text/plain")
    )
)]
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let output = state.metrics.as_ref().map(|handle| handle.render()).unwrap_or_default();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
        .into_response()
}

/// Snapshots of all pools, sorted by name
#[utoipa::path(
    get,
    path = "/pools",
    tag = "pools",
    responses(
        (status = 200, description = "Pool snapshots", body = Vec<PoolSnapshot>)
    )
)]
async fn list_pools(State(state): State<AppState>) -> Json<Vec<PoolSnapshot>> {
    Json(state.controller.get_all_snapshots())
}

/// Snapshot of one pool
#[utoipa::path(
    get,
    path = "/pools/{name}",
    tag = "pools",
    params(("name" = String, Path, description = "Pool name")),
    responses(
        (status = 200, description = "Pool snapshot", body = PoolSnapshot),
        (status = 404, description = "Pool not found")
    )
)]
async fn get_pool(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.controller.get_snapshot(&name) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e),
    }
}

/// Manually resize a pool
#[utoipa::path(
    post,
    path = "/pools/{name}/adjust",
    tag = "pools",
    params(("name" = String, Path, description = "Pool name")),
    request_body = AdjustRequest,
    responses(
        (status = 200, description = "Sizing applied", body = AdjustResponse),
        (status = 404, description = "Pool not found")
    )
)]
async fn adjust_pool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<AdjustRequest>,
) -> Response {
    match state.controller.adjust(&name, req.core, req.max) {
        Ok(applied) => {
            info!(pool = %name, requested_core = req.core, requested_max = req.max, %applied, "Pool resized via API");
            Json(AdjustResponse { pool: name, applied }).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Change a pool's queue capacity
#[utoipa::path(
    post,
    path = "/pools/{name}/queue-capacity",
    tag = "pools",
    params(("name" = String, Path, description = "Pool name")),
    request_body = QueueCapacityRequest,
    responses(
        (status = 200, description = "Capacity applied", body = QueueCapacityResponse),
        (status = 400, description = "Queue is not resizable"),
        (status = 404, description = "Pool not found")
    )
)]
async fn resize_queue(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<QueueCapacityRequest>,
) -> Response {
    match state.controller.resize_queue(&name, req.capacity) {
        Ok(capacity) => Json(QueueCapacityResponse { pool: name, capacity }).into_response(),
        Err(e) => error_response(e),
    }
}

fn tuning_response(state: &AppState, name: String, changed: Option<bool>) -> Response {
    let active = state.controller.is_tuning_active(&name);
    let last_applied = state.controller.last_applied(&name);
    match (active, last_applied) {
        (Ok(active), Ok(last_applied)) => Json(TuningStatusResponse {
            pool: name,
            active,
            changed,
            last_applied,
        })
        .into_response(),
        (Err(e), _) | (_, Err(e)) => error_response(e),
    }
}

/// Start periodic tuning of a pool (idempotent)
#[utoipa::path(
    post,
    path = "/pools/{name}/tuning/start",
    tag = "tuning",
    params(("name" = String, Path, description = "Pool name")),
    responses(
        (status = 200, description = "Tuning active", body = TuningStatusResponse),
        (status = 404, description = "Pool not found")
    )
)]
async fn start_tuning(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.controller.start_tuning(&name) {
        Ok(changed) => tuning_response(&state, name, Some(changed)),
        Err(e) => error_response(e),
    }
}

/// Stop periodic tuning of a pool (idempotent)
#[utoipa::path(
    post,
    path = "/pools/{name}/tuning/stop",
    tag = "tuning",
    params(("name" = String, Path, description = "Pool name")),
    responses(
        (status = 200, description = "Tuning stopped", body = TuningStatusResponse),
        (status = 404, description = "Pool not found")
    )
)]
async fn stop_tuning(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.controller.stop_tuning(&name) {
        Ok(changed) => tuning_response(&state, name, Some(changed)),
        Err(e) => error_response(e),
    }
}

/// Tuning state of a pool
#[utoipa::path(
    get,
    path = "/pools/{name}/tuning",
    tag = "tuning",
    params(("name" = String, Path, description = "Pool name")),
    responses(
        (status = 200, description = "Tuning state", body = TuningStatusResponse),
        (status = 404, description = "Pool not found")
    )
)]
async fn tuning_status(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    tuning_response(&state, name, None)
}

/// Run one tuning cycle now and report its outcome
#[utoipa::path(
    post,
    path = "/pools/{name}/tune-now",
    tag = "tuning",
    params(("name" = String, Path, description = "Pool name")),
    responses(
        (status = 200, description = "Cycle outcome", body = TuneNowResponse),
        (status = 404, description = "Pool not found")
    )
)]
async fn tune_now(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.controller.tune_now(&name).await {
        Ok(outcome) => Json(TuneNowResponse::from_outcome(name, outcome)).into_response(),
        Err(e) => error_response(e),
    }
}
