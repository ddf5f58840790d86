use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::Response,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState, SharedState};
use crate::config::HostingConfig;

/// Whether `host` (optionally with a port) addresses the control API.
pub fn is_control_host(control_hosts: &[String], host: &str) -> bool {
    let bare = host.split(':').next().unwrap_or_default();
    control_hosts.iter().any(|h| h.eq_ignore_ascii_case(bare))
}

/// Route by `Host`: control hosts reach the API, everything else the proxy.
async fn dispatch(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    match host {
        Some(host) if !is_control_host(&state.control_hosts, &host) => {
            state.hosting.proxy.handle(req).await
        }
        _ => next.run(req).await,
    }
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"success": false, "error": "not_found", "message": "No such route"})),
    )
}

/// Build the full application router: control API behind host dispatch.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), dispatch))
        .with_state(state)
}

/// Serve until Ctrl+C, running the activity monitor alongside.
pub async fn start_server(config: &HostingConfig, state: AppState) -> Result<()> {
    let state = Arc::new(state);
    let cancel = state.shutdown.clone();

    let monitor = if config.activity.enabled {
        Some(tokio::spawn(state.hosting.monitor().run(cancel.clone())))
    } else {
        tracing::info!("Activity monitor disabled");
        None
    };

    let mut app = build_router(state.clone());
    if config.server.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(
        address = %local_addr,
        strategy = %state.hosting.reconciler.strategy(),
        "Control plane listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Some(monitor) = monitor
        && let Err(e) = monitor.await
    {
        tracing::warn!(error = %e, "Activity monitor task ended abnormally");
    }
    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
    cancel.cancel();
}
