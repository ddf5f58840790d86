//! Container runtime boundary.
//!
//! [`ContainerRuntime`] is the only way the rest of the crate touches the
//! daemon. The production implementation is [`docker::DockerRuntime`]
//! (bollard over the local socket); tests use an in-memory double.
//! Containers are always addressed by name, never by id, because the name
//! is what [`crate::naming::resolve`] derives from a project URL.

pub mod docker;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;

use crate::errors::RuntimeError;
use crate::models::ContainerStatus;

pub use docker::DockerRuntime;

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// What to build and how to tag it.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub context_dir: PathBuf,
    pub dockerfile: String,
    pub tag: String,
    pub build_args: HashMap<String, String>,
    /// Always true for lifecycle builds: every build starts from scratch.
    pub no_cache: bool,
}

/// Caller-supplied additions to the container definition.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateOptions {
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub command: Option<Vec<String>>,
    pub working_dir: Option<String>,
}

/// Fixed resource caps applied to every project container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_bytes: i64,
    pub memory_swap_bytes: i64,
    pub cpu_quota: i64,
    pub cpu_period: i64,
}

#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub limits: ResourceLimits,
    pub options: CreateOptions,
}

/// Inspect result, reduced to what the control plane reads.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image_id: String,
    pub status: ContainerStatus,
    /// RFC 3339 start time; `None` if never started.
    pub started_at: Option<String>,
    /// Address on each attached network, keyed by network name.
    pub ip_addresses: HashMap<String, String>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }
}

/// Cumulative counters from a single stats read.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSample {
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_cpu: u64,
    pub presystem_cpu: u64,
    pub online_cpus: u32,
    pub memory_usage: u64,
    pub rx_bytes: u64,
    pub rx_packets: u64,
}

/// A container lifecycle event from the runtime's event feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    pub action: String,
    pub container_name: String,
}

/// Event actions the reconciliation feed subscribes to.
pub const WATCHED_ACTIONS: &[&str] = &["start", "die", "create", "destroy", "pause", "unpause"];

/// Operations the control plane needs from a container runtime.
///
/// Every call may block on I/O to the daemon. Implementations must be safe
/// to share across tasks.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build an image from a directory and return its id.
    async fn build_image(&self, spec: &BuildSpec) -> RuntimeResult<String>;

    /// Create (but do not start) a container; returns the container id.
    async fn create_container(&self, spec: &CreateSpec) -> RuntimeResult<String>;

    /// Inspect a container by name, including stopped ones.
    /// `Ok(None)` when no container has that name.
    async fn inspect_container(&self, name: &str) -> RuntimeResult<Option<ContainerInfo>>;

    /// Names of all currently running containers.
    async fn list_running(&self) -> RuntimeResult<Vec<String>>;

    async fn start_container(&self, name: &str) -> RuntimeResult<()>;

    /// Stop with a grace period before the runtime force-kills.
    async fn stop_container(&self, name: &str, grace: Duration) -> RuntimeResult<()>;

    /// Force-remove a container, running or not.
    async fn remove_container(&self, name: &str) -> RuntimeResult<()>;

    /// Force-remove an image by id or tag.
    async fn remove_image(&self, reference: &str) -> RuntimeResult<()>;

    /// Ids of images matching a repository tag.
    async fn images_tagged(&self, tag: &str) -> RuntimeResult<Vec<String>>;

    /// Remove untagged images; returns how many were deleted.
    async fn prune_dangling_images(&self) -> RuntimeResult<usize>;

    /// One stats read for a running container.
    async fn stats(&self, name: &str) -> RuntimeResult<StatsSample>;

    /// Subscribe to container events restricted to [`WATCHED_ACTIONS`].
    /// Dropping the stream releases the subscription.
    fn events(&self) -> BoxStream<'static, RuntimeResult<RuntimeEvent>>;
}

#[cfg(test)]
pub mod fake;
