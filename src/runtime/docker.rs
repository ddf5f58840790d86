use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, ContainerInspectResponse, EventMessage, HostConfig};
use bollard::query_parameters::{
    BuildImageOptions, CreateContainerOptions, EventsOptions, InspectContainerOptions,
    ListContainersOptions, ListImagesOptions, PruneImagesOptions, RemoveContainerOptions,
    RemoveImageOptions, StartContainerOptions, StatsOptions, StopContainerOptions,
};
use futures::stream::BoxStream;
use futures_util::StreamExt;

use super::{
    BuildSpec, ContainerInfo, ContainerRuntime, CreateSpec, RuntimeEvent, RuntimeResult,
    StatsSample, WATCHED_ACTIONS,
};
use crate::errors::RuntimeError;
use crate::models::ContainerStatus;

/// Start time the runtime reports for containers that never ran.
const NEVER_STARTED: &str = "0001-01-01T00:00:00Z";

impl From<BollardError> for RuntimeError {
    fn from(err: BollardError) -> Self {
        match err {
            BollardError::DockerResponseServerError {
                status_code: 404,
                message,
            } => Self::NotFound(message),
            BollardError::DockerResponseServerError {
                status_code: 409,
                message,
            } => Self::Conflict(message),
            BollardError::DockerStreamError { error } => Self::Build(error),
            other => Self::Api(other.to_string()),
        }
    }
}

/// [`ContainerRuntime`] backed by the local Docker-compatible daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform's default socket and verify the daemon answers.
    pub async fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        Ok(Self { docker })
    }
}

/// Pack a build context directory into an in-memory tar archive.
fn archive_context(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

fn single_filter(key: &str, value: &str) -> HashMap<String, Vec<String>> {
    HashMap::from([(key.to_string(), vec![value.to_string()])])
}

fn container_info(resp: ContainerInspectResponse) -> ContainerInfo {
    let state = resp.state.unwrap_or_default();
    let status = state
        .status
        .map(|s| ContainerStatus::from_runtime_state(&s.to_string()))
        .unwrap_or_default();
    let started_at = state
        .started_at
        .filter(|s| !s.is_empty() && s != NEVER_STARTED);
    let ip_addresses = resp
        .network_settings
        .and_then(|settings| settings.networks)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(network, endpoint)| {
            endpoint
                .ip_address
                .filter(|ip| !ip.is_empty())
                .map(|ip| (network, ip))
        })
        .collect();

    ContainerInfo {
        id: resp.id.unwrap_or_default(),
        name: resp
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        image_id: resp.image.unwrap_or_default(),
        status,
        started_at,
        ip_addresses,
    }
}

fn runtime_event(message: EventMessage) -> Option<RuntimeEvent> {
    let action = message.action?;
    let container_name = message.actor?.attributes?.get("name")?.clone();
    Some(RuntimeEvent {
        action,
        container_name,
    })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn build_image(&self, spec: &BuildSpec) -> RuntimeResult<String> {
        let context_dir = spec.context_dir.clone();
        let archive = tokio::task::spawn_blocking(move || archive_context(&context_dir))
            .await
            .map_err(|e| RuntimeError::Api(format!("Archiving task panicked: {}", e)))?
            .map_err(|e| RuntimeError::Build(format!("Failed to archive build context: {}", e)))?;

        let options = BuildImageOptions {
            dockerfile: spec.dockerfile.clone(),
            t: Some(spec.tag.clone()),
            nocache: spec.no_cache,
            rm: true,
            forcerm: true,
            buildargs: Some(spec.build_args.clone()),
            ..Default::default()
        };

        let mut progress = Box::pin(self.docker.build_image(
            options,
            None,
            Some(bollard::body_full(archive.into())),
        ));
        while let Some(item) = progress.next().await {
            let info = item?;
            if let Some(message) = info.error_detail.and_then(|detail| detail.message) {
                return Err(RuntimeError::Build(message));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::debug!(tag = %spec.tag, "{}", line);
                }
            }
        }

        let image = self.docker.inspect_image(&spec.tag).await?;
        image
            .id
            .ok_or_else(|| RuntimeError::Build(format!("Image {} has no id after build", spec.tag)))
    }

    async fn create_container(&self, spec: &CreateSpec) -> RuntimeResult<String> {
        let env: Vec<String> = spec
            .options
            .env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: (!env.is_empty()).then_some(env),
            labels: (!spec.options.labels.is_empty()).then(|| spec.options.labels.clone()),
            cmd: spec.options.command.clone(),
            working_dir: spec.options.working_dir.clone(),
            host_config: Some(HostConfig {
                memory: Some(spec.limits.memory_bytes),
                memory_swap: Some(spec.limits.memory_swap_bytes),
                cpu_quota: Some(spec.limits.cpu_quota),
                cpu_period: Some(spec.limits.cpu_period),
                network_mode: Some(spec.network.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        };

        let response = self.docker.create_container(Some(options), body).await?;
        for warning in &response.warnings {
            tracing::warn!(container = %spec.name, "{}", warning);
        }
        Ok(response.id)
    }

    async fn inspect_container(&self, name: &str) -> RuntimeResult<Option<ContainerInfo>> {
        match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(resp) => Ok(Some(container_info(resp))),
            Err(err) => match RuntimeError::from(err) {
                RuntimeError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn list_running(&self) -> RuntimeResult<Vec<String>> {
        let options = ListContainersOptions {
            all: false,
            filters: Some(single_filter("status", "running")),
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|summary| summary.names.and_then(|names| names.into_iter().next()))
            .map(|name| name.trim_start_matches('/').to_string())
            .collect())
    }

    async fn start_container(&self, name: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, name: &str, grace: Duration) -> RuntimeResult<()> {
        let options = StopContainerOptions {
            t: Some(grace.as_secs().min(i32::MAX as u64) as i32),
            ..Default::default()
        };
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove_container(&self, name: &str) -> RuntimeResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_container(name, Some(options)).await?;
        Ok(())
    }

    async fn remove_image(&self, reference: &str) -> RuntimeResult<()> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_image(reference, Some(options), None)
            .await?;
        Ok(())
    }

    async fn images_tagged(&self, tag: &str) -> RuntimeResult<Vec<String>> {
        let options = ListImagesOptions {
            filters: Some(single_filter("reference", tag)),
            ..Default::default()
        };
        let images = self.docker.list_images(Some(options)).await?;
        Ok(images.into_iter().map(|image| image.id).collect())
    }

    async fn prune_dangling_images(&self) -> RuntimeResult<usize> {
        let options = PruneImagesOptions {
            filters: Some(single_filter("dangling", "true")),
            ..Default::default()
        };
        let response = self.docker.prune_images(Some(options)).await?;
        Ok(response.images_deleted.map(|deleted| deleted.len()).unwrap_or(0))
    }

    async fn stats(&self, name: &str) -> RuntimeResult<StatsSample> {
        // stream=false, one_shot=false: the daemon waits for a second sample
        // so precpu_stats is populated.
        let options = StatsOptions {
            stream: false,
            one_shot: false,
            ..Default::default()
        };
        let stats = Box::pin(self.docker.stats(name, Some(options)))
            .next()
            .await
            .ok_or_else(|| RuntimeError::Api(format!("Empty stats response for {}", name)))??;

        let cpu = stats.cpu_stats.unwrap_or_default();
        let precpu = stats.precpu_stats.unwrap_or_default();
        let networks = stats.networks.unwrap_or_default();

        Ok(StatsSample {
            cpu_total: cpu
                .cpu_usage
                .as_ref()
                .and_then(|u| u.total_usage)
                .unwrap_or(0),
            precpu_total: precpu
                .cpu_usage
                .as_ref()
                .and_then(|u| u.total_usage)
                .unwrap_or(0),
            system_cpu: cpu.system_cpu_usage.unwrap_or(0),
            presystem_cpu: precpu.system_cpu_usage.unwrap_or(0),
            online_cpus: cpu.online_cpus.unwrap_or_else(|| {
                cpu.cpu_usage
                    .as_ref()
                    .and_then(|u| u.percpu_usage.as_ref())
                    .map(|per| per.len() as u32)
                    .unwrap_or(0)
            }),
            memory_usage: stats.memory_stats.and_then(|m| m.usage).unwrap_or(0),
            rx_bytes: networks.values().filter_map(|n| n.rx_bytes).sum(),
            rx_packets: networks.values().filter_map(|n| n.rx_packets).sum(),
        })
    }

    fn events(&self) -> BoxStream<'static, RuntimeResult<RuntimeEvent>> {
        let mut filters = single_filter("type", "container");
        filters.insert(
            "event".to_string(),
            WATCHED_ACTIONS.iter().map(|a| a.to_string()).collect(),
        );
        let options = EventsOptions {
            filters: Some(filters),
            ..Default::default()
        };

        self.docker
            .events(Some(options))
            .filter_map(|item| async move {
                match item {
                    Ok(message) => runtime_event(message).map(Ok),
                    Err(err) => Some(Err(RuntimeError::from(err))),
                }
            })
            .boxed()
    }
}
