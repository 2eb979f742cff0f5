use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use fastocr_config::{AppSettings, ConfigStore};

use crate::error::ServerError;
use crate::submit::{SubmitResponse, Submitter, UploadedFile};

/// Request body cap when `FASTOCR_MAX_UPLOAD_MB` is not set.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared application state for API handlers.
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub submitter: Submitter,
}

impl AppState {
    pub fn new(submitter: Submitter) -> Self {
        Self {
            config: Arc::clone(submitter.config()),
            submitter,
        }
    }
}

/// Build the Axum router with all API routes.
pub fn build_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/config", get(get_config).post(update_config))
        .route("/upload", post(upload))
        .route("/history", get(history))
        .route("/result/:task_id", get(result))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Welcome to Fast OCR API" }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "fastocr",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<AppSettings> {
    Json(state.config.get().as_ref().clone())
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, ServerError> {
    let updated = state.config.update(&patch).await?;
    info!(
        model = %updated.model_name,
        queue = %updated.rabbitmq_queue,
        workers = updated.worker_concurrency,
        "Configuration updated"
    );
    Ok(Json(json!({ "message": "Configuration updated successfully." })))
}

/// Every multipart field carrying a file name is treated as an upload.
async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ServerError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Failed to read multipart field: {e}")))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read file {filename}: {e}")))?;
        files.push(UploadedFile {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    let response = state.submitter.submit(files).await?;
    Ok(Json(response))
}

async fn history(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ServerError> {
    let history = state.submitter.history().await?;
    Ok(Json(json!({ "history": history })))
}

async fn result(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    Ok(Json(state.submitter.status(&task_id).await?))
}
