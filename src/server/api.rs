use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::stream;
use crate::errors::HostingError;
use crate::hosting::Hosting;
use crate::lifecycle::BuildRequest;
use crate::store::{Authenticator, Principal};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub hosting: Hosting,
    pub auth: Arc<dyn Authenticator>,
    /// Hosts served by the control API; every other host is proxied.
    pub control_hosts: Vec<String>,
    /// Cancelled on server shutdown; ends background work and open streams.
    pub shutdown: CancellationToken,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    Hosting(HostingError),
    BadRequest(String),
}

impl From<HostingError> for ApiError {
    fn from(err: HostingError) -> Self {
        Self::Hosting(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Hosting(err) => {
                if err.status().is_server_error() {
                    tracing::error!(code = err.code(), error = %err, "Request failed");
                }
                (err.status(), err.code(), err.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
        };
        (
            status,
            Json(serde_json::json!({"success": false, "error": code, "message": message})),
        )
            .into_response()
    }
}

fn ok<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    (
        status,
        Json(serde_json::json!({"success": true, "message": message, "data": data})),
    )
        .into_response()
}

// ── Authentication ────────────────────────────────────────────────────

/// Resolve the caller from `Authorization: Bearer <token>`.
pub async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or_default();
    if token.is_empty() {
        return Err(HostingError::Unauthorized("missing bearer token".into()).into());
    }
    Ok(state.auth.authenticate(token).await?)
}

fn build_request(body: &Bytes) -> Result<BuildRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(BuildRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/containers/events", get(stream::events))
        .route("/containers/refresh", post(refresh_containers))
        .route("/containers/{id}/create", post(create_container))
        .route("/containers/{id}/start", post(start_container))
        .route("/containers/{id}/stop", post(stop_container))
        .route("/containers/{id}/rebuild", post(rebuild_container))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_container(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let principal = authorize(&state, &headers).await?;
    let request = build_request(&body)?;
    let outcome = state.hosting.lifecycle.create(&principal, &id, request).await?;
    Ok(ok(StatusCode::CREATED, "Container created", outcome))
}

async fn rebuild_container(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let principal = authorize(&state, &headers).await?;
    let request = build_request(&body)?;
    let outcome = state.hosting.lifecycle.rebuild(&principal, &id, request).await?;
    Ok(ok(StatusCode::OK, "Container rebuilt", outcome))
}

async fn start_container(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = authorize(&state, &headers).await?;
    let change = state.hosting.lifecycle.start(&principal, &id).await?;
    let message = change.message.clone();
    Ok(ok(StatusCode::OK, &message, change))
}

async fn stop_container(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = authorize(&state, &headers).await?;
    let change = state.hosting.lifecycle.stop(&principal, &id).await?;
    let message = change.message.clone();
    Ok(ok(StatusCode::OK, &message, change))
}

async fn refresh_containers(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let principal = authorize(&state, &headers).await?;
    let summary = state.hosting.refresh_projects(&principal).await?;
    Ok(ok(StatusCode::OK, "Container list refreshed", summary))
}
