//! Typed error hierarchy for the control plane.
//!
//! Two enums cover the two boundaries:
//! - `RuntimeError`: what the container runtime reported for one call
//! - `HostingError`: what a lifecycle operation reports to its caller, with
//!   a stable machine-readable code and HTTP status

use axum::http::StatusCode;
use thiserror::Error;

/// Failure of a single call to the container runtime.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("No such container or image: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Image build failed: {0}")]
    Build(String),

    #[error("Runtime API error: {0}")]
    Api(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors from lifecycle operations and the API surface around them.
#[derive(Debug, Error)]
pub enum HostingError {
    #[error("No project with id {id}")]
    ProjectNotFound { id: String },

    #[error("No container named {name}")]
    ContainerNotFound { name: String },

    #[error("No cached container entry for id {id}; refresh the project list first")]
    ContainerIdNotCached { id: String },

    #[error("Either contextPath or repoUrl must be provided")]
    NoContext,

    #[error("Invalid build context path: {path}")]
    InvalidContextPath { path: String },

    #[error("Cloning {url} failed: {message}")]
    GitCloneFailed { url: String, message: String },

    #[error("Image build failed: {0}")]
    ImageBuild(String),

    #[error("Container runtime error: {0}")]
    DockerApi(String),

    #[error("Container creation failed: {0}")]
    ContainerCreate(String),

    #[error("Removing container failed: {0}")]
    RemoveFailed(String),

    #[error("Starting container failed: {0}")]
    StartFailed(String),

    #[error("Stopping container failed: {0}")]
    StopFailed(String),

    #[error("Project store error: {0}")]
    ProjectStore(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl HostingError {
    /// Stable code returned to clients in the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProjectNotFound { .. } => "project_not_found",
            Self::ContainerNotFound { .. } => "container_not_found",
            Self::ContainerIdNotCached { .. } => "container_id_not_cached",
            Self::NoContext => "no_context",
            Self::InvalidContextPath { .. } => "invalid_context_path",
            Self::GitCloneFailed { .. } => "git_clone_failed",
            Self::ImageBuild(_) => "image_build_error",
            Self::DockerApi(_) => "docker_api_error",
            Self::ContainerCreate(_) => "container_create_error",
            Self::RemoveFailed(_) => "remove_failed",
            Self::StartFailed(_) => "start_failed",
            Self::StopFailed(_) => "stop_failed",
            Self::ProjectStore(_) => "project_store_error",
            Self::Unauthorized(_) => "unauthorized",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::ProjectNotFound { .. }
            | Self::ContainerNotFound { .. }
            | Self::ContainerIdNotCached { .. } => StatusCode::NOT_FOUND,
            Self::NoContext | Self::InvalidContextPath { .. } | Self::GitCloneFailed { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ProjectStore(_) => StatusCode::BAD_GATEWAY,
            Self::ImageBuild(_)
            | Self::DockerApi(_)
            | Self::ContainerCreate(_)
            | Self::RemoveFailed(_)
            | Self::StartFailed(_)
            | Self::StopFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Runtime and store failures may succeed on retry; input and not-found
    /// errors need the client to change something first.
    pub fn is_retryable(&self) -> bool {
        self.status().is_server_error()
    }
}
