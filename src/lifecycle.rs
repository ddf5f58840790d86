//! Build → create → start → stop → rebuild for one project's container.
//!
//! Operations on the same project are not serialized here; callers must not
//! overlap them. Operations on different projects are independent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::activity::ActivityTracker;
use crate::config::{self, HostingConfig};
use crate::errors::{HostingError, RuntimeError};
use crate::models::ContainerStatus;
use crate::naming::{CacheEntry, ContainerNameCache};
use crate::runtime::{BuildSpec, ContainerRuntime, CreateOptions, CreateSpec, ResourceLimits};
use crate::source::SourceFetcher;
use crate::store::{Principal, ProjectStore};

/// Body of a create or rebuild request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildRequest {
    pub repo_url: Option<String>,
    pub context_path: Option<String>,
    pub build_args: HashMap<String, String>,
    pub create_options: CreateOptions,
}

/// Result of a successful create or rebuild.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    /// The project id the container belongs to.
    pub container_id: String,
    pub docker_name: String,
    pub image_id: String,
    pub created_container_id: String,
    pub started: bool,
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebuilt: Option<bool>,
}

/// Result of a start or stop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub container_id: String,
    pub docker_name: String,
    pub state: ContainerStatus,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub network: String,
    pub dockerfile: String,
    pub limits: ResourceLimits,
    pub stop_grace: Duration,
    pub clone_root: Option<PathBuf>,
}

impl LifecycleSettings {
    pub fn from_config(config: &HostingConfig) -> anyhow::Result<Self> {
        let runtime = &config.runtime;
        Ok(Self {
            network: runtime.network.clone(),
            dockerfile: runtime.dockerfile.clone(),
            limits: ResourceLimits {
                memory_bytes: config::parse_memory(&runtime.memory)?,
                memory_swap_bytes: config::parse_memory(&runtime.memory_swap)?,
                cpu_quota: runtime.cpu_quota,
                cpu_period: runtime.cpu_period,
            },
            stop_grace: runtime.stop_grace(),
            clone_root: runtime.clone_dir.clone(),
        })
    }
}

/// Where the image is built from. A cloned context owns its temp dir.
enum BuildContext {
    Given(PathBuf),
    Cloned(tempfile::TempDir),
}

impl BuildContext {
    fn path(&self) -> &Path {
        match self {
            Self::Given(path) => path,
            Self::Cloned(dir) => dir.path(),
        }
    }

    /// Remove a cloned checkout. Failures are logged, never returned.
    fn cleanup(self) {
        if let Self::Cloned(dir) = self {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed clone directory"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove clone directory")
                }
            }
        }
    }
}

pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<dyn ProjectStore>,
    fetcher: Arc<dyn SourceFetcher>,
    names: Arc<ContainerNameCache>,
    tracker: Arc<ActivityTracker>,
    settings: LifecycleSettings,
}

impl LifecycleManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn ProjectStore>,
        fetcher: Arc<dyn SourceFetcher>,
        names: Arc<ContainerNameCache>,
        tracker: Arc<ActivityTracker>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            runtime,
            store,
            fetcher,
            names,
            tracker,
            settings,
        }
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Build an image for the project and create (but not start) its
    /// container, replacing any container with the same name.
    pub async fn create(
        &self,
        principal: &Principal,
        project_id: &str,
        request: BuildRequest,
    ) -> Result<BuildOutcome, HostingError> {
        let project = self
            .store
            .get_project(principal, project_id)
            .await?
            .ok_or_else(|| HostingError::ProjectNotFound {
                id: project_id.to_string(),
            })?;
        let entry = self.names.remember(&project);
        tracing::info!(project_id, container = %entry.container_name, "Creating container");
        self.build_and_create(project_id, &entry, request).await
    }

    /// Tear down the project's container and image, then create afresh.
    pub async fn rebuild(
        &self,
        principal: &Principal,
        project_id: &str,
        request: BuildRequest,
    ) -> Result<BuildOutcome, HostingError> {
        let entry = self.container_entry(principal, project_id).await?;
        let name = entry.container_name.as_str();
        tracing::info!(project_id, container = %name, "Rebuilding container");

        self.teardown(name).await?;
        let mut outcome = self.build_and_create(project_id, &entry, request).await?;
        outcome.rebuilt = Some(true);
        Ok(outcome)
    }

    pub async fn start(
        &self,
        principal: &Principal,
        project_id: &str,
    ) -> Result<StateChange, HostingError> {
        let entry = self.container_entry(principal, project_id).await?;
        let name = entry.container_name;
        let info = self.inspect_existing(&name).await?;

        if info.is_running() {
            return Ok(StateChange {
                container_id: project_id.to_string(),
                message: format!("Container {} was already running", name),
                docker_name: name,
                state: ContainerStatus::Running,
            });
        }

        self.runtime
            .start_container(&name)
            .await
            .map_err(|e| HostingError::StartFailed(e.to_string()))?;
        if self.tracker.reset(&name) {
            tracing::debug!(container = %name, "Cleared stale activity record");
        }
        tracing::info!(project_id, container = %name, "Container started");

        Ok(StateChange {
            container_id: project_id.to_string(),
            message: format!("Container {} started", name),
            docker_name: name,
            state: ContainerStatus::Running,
        })
    }

    pub async fn stop(
        &self,
        principal: &Principal,
        project_id: &str,
    ) -> Result<StateChange, HostingError> {
        let entry = self.container_entry(principal, project_id).await?;
        let name = entry.container_name;
        let info = self.inspect_existing(&name).await?;

        if !info.is_running() {
            return Ok(StateChange {
                container_id: project_id.to_string(),
                message: format!("Container {} was already stopped", name),
                docker_name: name,
                state: info.status,
            });
        }

        self.runtime
            .stop_container(&name, self.settings.stop_grace)
            .await
            .map_err(|e| HostingError::StopFailed(e.to_string()))?;
        tracing::info!(project_id, container = %name, "Container stopped");

        Ok(StateChange {
            container_id: project_id.to_string(),
            message: format!("Container {} stopped", name),
            docker_name: name,
            state: ContainerStatus::Exited,
        })
    }

    // ── Pipeline ────────────────────────────────────────────────────

    /// Cache lookup first, then the store. A store outage with no cached
    /// entry surfaces as `container_id_not_cached`.
    async fn container_entry(
        &self,
        principal: &Principal,
        project_id: &str,
    ) -> Result<CacheEntry, HostingError> {
        if let Some(entry) = self.names.get(project_id)
            && entry.owner == principal.owner
        {
            return Ok(entry);
        }
        match self.store.get_project(principal, project_id).await {
            Ok(Some(project)) => Ok(self.names.remember(&project)),
            Ok(None) => Err(HostingError::ProjectNotFound {
                id: project_id.to_string(),
            }),
            Err(HostingError::ProjectStore(reason)) => {
                tracing::warn!(project_id, reason = %reason, "Project store unavailable");
                Err(HostingError::ContainerIdNotCached {
                    id: project_id.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn inspect_existing(
        &self,
        name: &str,
    ) -> Result<crate::runtime::ContainerInfo, HostingError> {
        self.runtime
            .inspect_container(name)
            .await
            .map_err(|e| HostingError::DockerApi(e.to_string()))?
            .ok_or_else(|| HostingError::ContainerNotFound {
                name: name.to_string(),
            })
    }

    async fn build_and_create(
        &self,
        project_id: &str,
        entry: &CacheEntry,
        request: BuildRequest,
    ) -> Result<BuildOutcome, HostingError> {
        let name = entry.container_name.as_str();
        let repo_url = request
            .repo_url
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| entry.github_url.clone());

        let context = self
            .acquire_context(name, request.context_path.as_deref(), repo_url.as_deref())
            .await?;
        let result = self.build_from(name, context.path(), &request).await;
        context.cleanup();

        let (image_id, created_container_id) = result?;
        Ok(BuildOutcome {
            container_id: project_id.to_string(),
            docker_name: name.to_string(),
            image_id,
            created_container_id,
            started: false,
            repo_url,
            rebuilt: None,
        })
    }

    async fn acquire_context(
        &self,
        name: &str,
        context_path: Option<&str>,
        repo_url: Option<&str>,
    ) -> Result<BuildContext, HostingError> {
        if let Some(path) = context_path.filter(|p| !p.is_empty()) {
            return Ok(BuildContext::Given(PathBuf::from(path)));
        }
        let url = repo_url.ok_or(HostingError::NoContext)?;

        // Temp dir failures are host faults, not a bad repository.
        let prefix = format!("{}_", name);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.settings.clone_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| HostingError::DockerApi(format!("Failed to create clone directory: {}", e)))?;
        tracing::info!(container = %name, url = %url, "Cloning repository");

        let context = BuildContext::Cloned(dir);
        if let Err(e) = self.fetcher.shallow_clone(url, context.path()).await {
            context.cleanup();
            return Err(HostingError::GitCloneFailed {
                url: url.to_string(),
                message: format!("{:#}", e),
            });
        }
        Ok(context)
    }

    /// Build, replace and create. Returns (image id, container id).
    async fn build_from(
        &self,
        name: &str,
        context_dir: &Path,
        request: &BuildRequest,
    ) -> Result<(String, String), HostingError> {
        if !context_dir.is_dir() {
            return Err(HostingError::InvalidContextPath {
                path: context_dir.display().to_string(),
            });
        }

        let image_id = self
            .runtime
            .build_image(&BuildSpec {
                context_dir: context_dir.to_path_buf(),
                dockerfile: self.settings.dockerfile.clone(),
                tag: name.to_string(),
                build_args: request.build_args.clone(),
                no_cache: true,
            })
            .await
            .map_err(|e| match e {
                RuntimeError::Build(msg) => HostingError::ImageBuild(msg),
                other => HostingError::DockerApi(other.to_string()),
            })?;
        tracing::info!(container = %name, image = %image_id, "Image built");

        self.remove_existing(name).await?;

        let container_id = self
            .runtime
            .create_container(&CreateSpec {
                name: name.to_string(),
                image: image_id.clone(),
                network: self.settings.network.clone(),
                limits: self.settings.limits,
                options: request.create_options.clone(),
            })
            .await
            .map_err(|e| HostingError::ContainerCreate(e.to_string()))?;
        tracing::info!(container = %name, id = %container_id, "Container created");

        match self.runtime.prune_dangling_images().await {
            Ok(0) => {}
            Ok(count) => tracing::info!(count, "Pruned dangling images"),
            Err(e) => tracing::warn!(error = %e, "Failed to prune dangling images"),
        }

        Ok((image_id, container_id))
    }

    /// Force-remove a container holding `name`, if any.
    async fn remove_existing(&self, name: &str) -> Result<(), HostingError> {
        match self.runtime.remove_container(name).await {
            Ok(()) => {
                tracing::info!(container = %name, "Removed previous container");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(HostingError::DockerApi(e.to_string())),
        }
    }

    /// Stop, remove, and drop the images behind `name`.
    async fn teardown(&self, name: &str) -> Result<(), HostingError> {
        let info = self
            .runtime
            .inspect_container(name)
            .await
            .map_err(|e| HostingError::DockerApi(e.to_string()))?;

        if let Some(info) = &info {
            if info.is_running()
                && let Err(e) = self
                    .runtime
                    .stop_container(name, self.settings.stop_grace)
                    .await
            {
                tracing::warn!(container = %name, error = %e, "Stop before rebuild failed; forcing removal");
            }
            match self.runtime.remove_container(name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(HostingError::RemoveFailed(e.to_string())),
            }
            self.tracker.reset(name);
            self.remove_image_quietly(&info.image_id).await;
        }

        match self.runtime.images_tagged(name).await {
            Ok(ids) => {
                for id in ids {
                    self.remove_image_quietly(&id).await;
                }
            }
            Err(e) => tracing::debug!(container = %name, error = %e, "Could not list tagged images"),
        }
        Ok(())
    }

    async fn remove_image_quietly(&self, reference: &str) {
        match self.runtime.remove_image(reference).await {
            Ok(()) => tracing::info!(image = %reference, "Removed image"),
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!(image = %reference, error = %e, "Failed to remove image"),
        }
    }
}
