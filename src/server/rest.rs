//! JSON REST API over the shared inspection service.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use super::{InspectionService, VERSION, stopped};
use crate::controller::DetectorInfo;
use crate::models::InspectionResult;

/// Shared application state.
pub struct AppState {
    pub service: Arc<InspectionService>,
    pub stats: RestStats,
}

#[derive(Debug, Default)]
pub struct RestStats {
    total_requests: AtomicU64,
    total_inspections: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestStatsSnapshot {
    pub total_requests: u64,
    pub total_inspections: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

impl RestStats {
    pub fn snapshot(&self) -> RestStatsSnapshot {
        RestStatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_inspections: self.total_inspections.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
        }
    }
}

/// POST /api/v1/inspect body. One of the two fields is required.
#[derive(Debug, Deserialize)]
pub struct InspectRequest {
    pub image_path: Option<String>,
    /// Base64-encoded image file.
    pub image: Option<String>,
}

/// POST /api/v1/config body.
#[derive(Debug, Deserialize)]
pub struct ConfigUpdate {
    pub visualization_enabled: Option<bool>,
    pub auto_save: Option<bool>,
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: "Bad Request", message }),
    )
}

fn internal_error(error: &'static str, message: String) -> ApiError {
    error!(kind = error, message = %message, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error, message }),
    )
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/v1/inspect", post(inspect))
        .route("/api/v1/status", get(status))
        .route("/api/v1/statistics", get(statistics))
        .route("/api/v1/detectors", get(detectors))
        .route("/api/v1/config", post(update_config))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API on `listener` until `stop` is raised.
pub async fn serve(
    service: Arc<InspectionService>,
    listener: TcpListener,
    stop: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        service,
        stats: RestStats::default(),
    });
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(stopped(stop))
        .await?;
    info!("REST listener stopped");
    Ok(())
}

async fn count_requests(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    state.stats.total_requests.fetch_add(1, Ordering::Relaxed);
    let response = next.run(request).await;
    let counter = if response.status().is_server_error() {
        &state.stats.failed_requests
    } else {
        &state.stats.successful_requests
    };
    counter.fetch_add(1, Ordering::Relaxed);
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": "Inspection API Server",
        "version": VERSION,
        "status": "running",
    }))
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Not Found", "path": uri.path()})),
    )
}

/// POST /api/v1/inspect: inspect an image given by path or inline base64.
async fn inspect(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let request: InspectRequest =
        serde_json::from_slice(&body).map_err(|_| bad_request("Invalid JSON".to_string()))?;

    let service = state.service.clone();
    let result = match (request.image_path, request.image) {
        (Some(path), _) => tokio::task::spawn_blocking(move || service.inspect_path(&path))
            .await
            .map_err(|e| internal_error("Internal Server Error", e.to_string()))?
            .map_err(|e| bad_request(e.to_string()))?,
        (None, Some(encoded)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| bad_request(format!("invalid base64: {e}")))?;
            let image = image::load_from_memory(&bytes)
                .map_err(|e| bad_request(format!("Failed to decode image: {e}")))?;
            tokio::task::spawn_blocking(move || service.inspect_image(&image, "<upload>"))
                .await
                .map_err(|e| internal_error("Internal Server Error", e.to_string()))?
        }
        (None, None) => return Err(bad_request("image_path or image is required".to_string())),
    };

    respond_with(&state, result)
}

fn respond_with(state: &AppState, result: InspectionResult) -> Result<Json<Value>, ApiError> {
    if !result.success {
        return Err(internal_error("Inspection Failed", result.error_message));
    }
    state.stats.total_inspections.fetch_add(1, Ordering::Relaxed);
    info!(
        judgment = result.judgment(),
        defects = result.defects.len(),
        total_ms = result.total_time_ms,
        "inspection via REST"
    );
    Ok(Json(result.to_json()))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let controller = state.service.controller();
    Json(json!({
        "status": "running",
        "port": state.service.server_config().rest_port,
        "auto_save": state.service.auto_save(),
        "controller": {
            "detector_count": controller.detector_count(),
            "visualization_enabled": controller.visualization_enabled(),
        }
    }))
}

async fn statistics(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "server": state.stats.snapshot(),
        "controller": state.service.controller().statistics(),
    }))
}

async fn detectors(State(state): State<Arc<AppState>>) -> Json<Vec<DetectorInfo>> {
    Json(state.service.controller().detector_infos())
}

async fn update_config(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let update: ConfigUpdate =
        serde_json::from_slice(&body).map_err(|_| bad_request("Invalid JSON".to_string()))?;
    if let Some(enabled) = update.visualization_enabled {
        state.service.controller().set_visualization_enabled(enabled);
    }
    if let Some(enabled) = update.auto_save {
        state.service.set_auto_save(enabled);
    }
    info!(?update, "configuration updated");
    Ok(Json(json!({"status": "ok", "message": "Configuration updated"})))
}
