//! Subdomain reverse proxy: `<project>.<owner>.localhost` → project container.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::config::{HostingConfig, ProxyAddress};
use crate::naming;
use crate::runtime::ContainerRuntime;

const HOST_SUFFIX: &str = ".localhost";

/// Headers never copied in either direction. The client decodes upstream
/// bodies itself, so the browser's `Accept-Encoding` is not passed on.
fn is_excluded(name: &HeaderName) -> bool {
    name == header::HOST
        || name == header::CONTENT_LENGTH
        || name == header::CONTENT_ENCODING
        || name == header::ACCEPT_ENCODING
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid host format: {0}")]
    MalformedHost(String),

    #[error("Container {0} is not running")]
    NotRunning(String),

    #[error("Container {container} is unreachable: {message}")]
    Unreachable { container: String, message: String },

    #[error("Proxy error: {0}")]
    Forward(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedHost(_) => StatusCode::BAD_REQUEST,
            Self::NotRunning(_) => StatusCode::NOT_FOUND,
            Self::Unreachable { .. } => StatusCode::BAD_GATEWAY,
            Self::Forward(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Check a `Host` value and return the project host without its port.
/// Exactly two labels must precede `.localhost`.
pub fn parse_host(host: &str) -> Result<String, ProxyError> {
    let bare = host.split(':').next().unwrap_or_default();
    let split = bare.len().saturating_sub(HOST_SUFFIX.len());
    if bare.len() <= HOST_SUFFIX.len()
        || !bare.is_char_boundary(split)
        || !bare[split..].eq_ignore_ascii_case(HOST_SUFFIX)
    {
        return Err(ProxyError::MalformedHost(host.to_string()));
    }
    let labels = &bare[..split];
    let parts: Vec<&str> = labels.split('.').collect();
    if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(ProxyError::MalformedHost(host.to_string()));
    }
    Ok(bare.to_string())
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub upstream_port: u16,
    pub address: ProxyAddress,
    pub network: String,
    pub timeout: Duration,
}

impl ProxySettings {
    pub fn from_config(config: &HostingConfig) -> Self {
        Self {
            upstream_port: config.proxy.upstream_port,
            address: config.proxy.address,
            network: config.runtime.network.clone(),
            timeout: Duration::from_secs(config.proxy.timeout_secs),
        }
    }
}

pub struct ProxyRouter {
    runtime: Arc<dyn ContainerRuntime>,
    client: reqwest::Client,
    settings: ProxySettings,
}

impl ProxyRouter {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: ProxySettings) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            runtime,
            client,
            settings,
        })
    }

    /// Base URL of the running container serving `name`.
    async fn upstream(&self, name: &str) -> Result<String, ProxyError> {
        let info = self
            .runtime
            .inspect_container(name)
            .await
            .map_err(|e| ProxyError::Forward(e.to_string()))?
            .filter(|info| info.is_running())
            .ok_or_else(|| ProxyError::NotRunning(name.to_string()))?;

        let host = match self.settings.address {
            ProxyAddress::Name => name.to_string(),
            ProxyAddress::Ip => info
                .ip_addresses
                .get(&self.settings.network)
                .or_else(|| info.ip_addresses.values().next())
                .filter(|ip| !ip.is_empty())
                .cloned()
                .unwrap_or_else(|| name.to_string()),
        };
        Ok(format!("http://{}:{}", host, self.settings.upstream_port))
    }

    /// Forward one request to its project container and stream back the
    /// response. Every failure becomes a JSON error response.
    pub async fn handle(&self, req: Request) -> Response {
        match self.forward(req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "Proxy request failed");
                e.into_response()
            }
        }
    }

    async fn forward(&self, req: Request) -> Result<Response, ProxyError> {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| req.uri().host())
            .ok_or_else(|| ProxyError::MalformedHost(String::new()))?;
        let host = parse_host(host)?;
        let name = naming::resolve(&host);
        let base = self.upstream(&name).await?;

        let (parts, body) = req.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", base, path);
        tracing::debug!(container = %name, method = %parts.method, url = %url, "Proxying");

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(filter_headers(&parts.headers))
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ProxyError::Unreachable {
                        container: name.clone(),
                        message: e.to_string(),
                    }
                } else {
                    ProxyError::Forward(e.to_string())
                }
            })?;

        let mut builder = Response::builder().status(upstream.status());
        if let Some(headers) = builder.headers_mut() {
            *headers = filter_headers(upstream.headers());
        }
        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| ProxyError::Forward(e.to_string()))
    }
}

fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_excluded(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}
