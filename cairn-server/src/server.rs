//! HTTP routes of the object server.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::storage::{ObjectStore, StoreError};

/// Server state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<ObjectStore>,
}

impl AppState {
    pub fn new(store: ObjectStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

/// Creates the HTTP router.
///
/// Request bodies are streamed to disk, so axum's default body limit is
/// replaced by the store's own size cap.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/objects", get(list_objects))
        .route(
            "/v1/objects/*key",
            get(download_object).put(upload_object).head(check_object),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// PUT /v1/objects/{key}
async fn upload_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Body,
) -> Result<Response, ServerError> {
    let stored = state.store.store(&key, body.into_data_stream()).await?;
    tracing::info!(key = %key, bytes = stored, "object uploaded");
    Ok(StatusCode::CREATED.into_response())
}

/// GET /v1/objects/{key}
async fn download_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ServerError> {
    let (file, size) = state.store.open(&key).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, size)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ServerError::Internal(format!("Failed to create response: {}", e)))
}

/// HEAD /v1/objects/{key}
async fn check_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, ServerError> {
    let size = state.store.size(&key).await?.ok_or(ServerError::NotFound)?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, size)
        .body(Body::empty())
        .map_err(|e| ServerError::Internal(format!("Failed to create response: {}", e)))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    prefix: String,
}

/// GET /v1/objects?prefix={prefix}
async fn list_objects(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Response, ServerError> {
    let entries = state.store.list(&params.prefix).await?;
    Ok(Json(entries).into_response())
}

/// Server error types.
#[derive(Debug)]
pub enum ServerError {
    BadRequest(String),
    PayloadTooLarge(String),
    NotFound,
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidKey(msg) => ServerError::BadRequest(msg),
            StoreError::NotFound => ServerError::NotFound,
            StoreError::TooLarge { .. } => ServerError::PayloadTooLarge(e.to_string()),
            StoreError::Stream(msg) => ServerError::BadRequest(msg),
            StoreError::Io(e) => {
                error!(error = %e, "storage failure");
                ServerError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ServerError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ServerError::NotFound => (StatusCode::NOT_FOUND, "Object not found".to_string()),
            ServerError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({ "error": message }));
        (status, body).into_response()
    }
}
