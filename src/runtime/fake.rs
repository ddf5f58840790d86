//! In-memory [`ContainerRuntime`] double for unit tests.
//!
//! Mirrors the daemon behaviours the control plane relies on: names are
//! unique, lifecycle calls emit events, tags move to the newest build and
//! leave the previous image dangling.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::broadcast;

use super::{
    BuildSpec, ContainerInfo, ContainerRuntime, CreateSpec, RuntimeEvent, RuntimeResult,
    StatsSample,
};
use crate::errors::RuntimeError;
use crate::models::ContainerStatus;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub image_id: String,
    pub status: ContainerStatus,
    pub started_at: Option<String>,
    pub ip: Option<String>,
    pub spec: Option<CreateSpec>,
}

#[derive(Default)]
struct State {
    containers: HashMap<String, FakeContainer>,
    /// image id → tags
    images: HashMap<String, Vec<String>>,
    stats: HashMap<String, StatsSample>,
    calls: Vec<String>,
    next_id: u64,
    fail_build: Option<RuntimeError>,
    fail_create: Option<RuntimeError>,
    fail_inspect: Option<RuntimeError>,
    fail_stop: HashSet<String>,
    fail_stats: HashSet<String>,
    fail_events: bool,
}

pub struct FakeRuntime {
    state: Mutex<State>,
    events: broadcast::Sender<RuntimeEvent>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    fn emit(&self, action: &str, name: &str) {
        let _ = self.events.send(RuntimeEvent {
            action: action.to_string(),
            container_name: name.to_string(),
        });
    }

    /// Add a container directly, bypassing build/create.
    pub fn add_container(&self, name: &str, status: ContainerStatus) {
        self.with(|s| {
            s.next_id += 1;
            let id = format!("c{}", s.next_id);
            s.containers.insert(
                name.to_string(),
                FakeContainer {
                    id,
                    image_id: format!("sha256:seed-{}", name),
                    status,
                    started_at: status
                        .is_running()
                        .then(|| chrono::Utc::now().to_rfc3339()),
                    ip: None,
                    spec: None,
                },
            );
        });
    }

    pub fn set_ip(&self, name: &str, ip: &str) {
        self.with(|s| {
            if let Some(c) = s.containers.get_mut(name) {
                c.ip = Some(ip.to_string());
            }
        });
    }

    pub fn set_stats(&self, name: &str, stats: StatsSample) {
        self.with(|s| {
            s.stats.insert(name.to_string(), stats);
        });
    }

    pub fn set_status(&self, name: &str, status: ContainerStatus) {
        self.with(|s| {
            if let Some(c) = s.containers.get_mut(name) {
                c.status = status;
            }
        });
    }

    pub fn fail_build(&self, err: RuntimeError) {
        self.with(|s| s.fail_build = Some(err));
    }

    pub fn fail_create(&self, err: RuntimeError) {
        self.with(|s| s.fail_create = Some(err));
    }

    pub fn fail_inspect(&self, err: RuntimeError) {
        self.with(|s| s.fail_inspect = Some(err));
    }

    pub fn fail_stop(&self, name: &str) {
        self.with(|s| {
            s.fail_stop.insert(name.to_string());
        });
    }

    pub fn fail_stats(&self, name: &str) {
        self.with(|s| {
            s.fail_stats.insert(name.to_string());
        });
    }

    /// Make every new event subscription fail immediately.
    pub fn fail_events(&self) {
        self.with(|s| s.fail_events = true);
    }

    /// Push an arbitrary event into the feed.
    pub fn push_event(&self, action: &str, name: &str) {
        self.emit(action, name);
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.with(|s| s.containers.get(name).cloned())
    }

    pub fn status_of(&self, name: &str) -> Option<ContainerStatus> {
        self.container(name).map(|c| c.status)
    }

    pub fn container_count(&self) -> usize {
        self.with(|s| s.containers.len())
    }

    pub fn image_ids(&self) -> Vec<String> {
        self.with(|s| s.images.keys().cloned().collect())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn event_subscribers(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn build_image(&self, spec: &BuildSpec) -> RuntimeResult<String> {
        self.with(|s| {
            s.calls.push(format!("build {}", spec.tag));
            if let Some(err) = s.fail_build.clone() {
                return Err(err);
            }
            if !spec.context_dir.is_dir() {
                return Err(RuntimeError::Build("context missing".into()));
            }
            s.next_id += 1;
            let id = format!("sha256:img{}", s.next_id);
            for tags in s.images.values_mut() {
                tags.retain(|t| t != &spec.tag);
            }
            s.images.insert(id.clone(), vec![spec.tag.clone()]);
            Ok(id)
        })
    }

    async fn create_container(&self, spec: &CreateSpec) -> RuntimeResult<String> {
        let id = self.with(|s| {
            s.calls.push(format!("create {}", spec.name));
            if let Some(err) = s.fail_create.clone() {
                return Err(err);
            }
            if s.containers.contains_key(&spec.name) {
                return Err(RuntimeError::Conflict(format!(
                    "name {} already in use",
                    spec.name
                )));
            }
            s.next_id += 1;
            let id = format!("c{}", s.next_id);
            s.containers.insert(
                spec.name.clone(),
                FakeContainer {
                    id: id.clone(),
                    image_id: spec.image.clone(),
                    status: ContainerStatus::Created,
                    started_at: None,
                    ip: None,
                    spec: Some(spec.clone()),
                },
            );
            Ok(id)
        })?;
        self.emit("create", &spec.name);
        Ok(id)
    }

    async fn inspect_container(&self, name: &str) -> RuntimeResult<Option<ContainerInfo>> {
        self.with(|s| {
            s.calls.push(format!("inspect {}", name));
            if let Some(err) = s.fail_inspect.clone() {
                return Err(err);
            }
            Ok(s.containers.get(name).map(|c| ContainerInfo {
                id: c.id.clone(),
                name: name.to_string(),
                image_id: c.image_id.clone(),
                status: c.status,
                started_at: c.started_at.clone(),
                ip_addresses: c
                    .ip
                    .iter()
                    .map(|ip| ("app-network".to_string(), ip.clone()))
                    .collect(),
            }))
        })
    }

    async fn list_running(&self) -> RuntimeResult<Vec<String>> {
        self.with(|s| {
            s.calls.push("list_running".to_string());
            let mut names: Vec<String> = s
                .containers
                .iter()
                .filter(|(_, c)| c.status.is_running())
                .map(|(name, _)| name.clone())
                .collect();
            names.sort();
            Ok(names)
        })
    }

    async fn start_container(&self, name: &str) -> RuntimeResult<()> {
        self.with(|s| {
            s.calls.push(format!("start {}", name));
            let c = s
                .containers
                .get_mut(name)
                .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
            c.status = ContainerStatus::Running;
            c.started_at = Some(chrono::Utc::now().to_rfc3339());
            Ok::<(), RuntimeError>(())
        })?;
        self.emit("start", name);
        Ok(())
    }

    async fn stop_container(&self, name: &str, _grace: Duration) -> RuntimeResult<()> {
        self.with(|s| {
            s.calls.push(format!("stop {}", name));
            if s.fail_stop.contains(name) {
                return Err(RuntimeError::Api(format!("cannot stop {}", name)));
            }
            let c = s
                .containers
                .get_mut(name)
                .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
            c.status = ContainerStatus::Exited;
            Ok(())
        })?;
        self.emit("die", name);
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> RuntimeResult<()> {
        self.with(|s| {
            s.calls.push(format!("remove {}", name));
            s.containers
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
        })?;
        self.emit("destroy", name);
        Ok(())
    }

    async fn remove_image(&self, reference: &str) -> RuntimeResult<()> {
        self.with(|s| {
            s.calls.push(format!("remove_image {}", reference));
            let id = if s.images.contains_key(reference) {
                Some(reference.to_string())
            } else {
                s.images
                    .iter()
                    .find(|(_, tags)| tags.iter().any(|t| t == reference))
                    .map(|(id, _)| id.clone())
            };
            match id {
                Some(id) => {
                    s.images.remove(&id);
                    Ok(())
                }
                None => Err(RuntimeError::NotFound(reference.to_string())),
            }
        })
    }

    async fn images_tagged(&self, tag: &str) -> RuntimeResult<Vec<String>> {
        self.with(|s| {
            Ok(s.images
                .iter()
                .filter(|(_, tags)| tags.iter().any(|t| t == tag))
                .map(|(id, _)| id.clone())
                .collect())
        })
    }

    async fn prune_dangling_images(&self) -> RuntimeResult<usize> {
        self.with(|s| {
            s.calls.push("prune".to_string());
            let in_use: HashSet<String> =
                s.containers.values().map(|c| c.image_id.clone()).collect();
            let before = s.images.len();
            s.images
                .retain(|id, tags| !tags.is_empty() || in_use.contains(id));
            Ok(before - s.images.len())
        })
    }

    async fn stats(&self, name: &str) -> RuntimeResult<StatsSample> {
        self.with(|s| {
            s.calls.push(format!("stats {}", name));
            if s.fail_stats.contains(name) {
                return Err(RuntimeError::Api(format!("stats unavailable for {}", name)));
            }
            Ok(s.stats.get(name).copied().unwrap_or_default())
        })
    }

    fn events(&self) -> BoxStream<'static, RuntimeResult<RuntimeEvent>> {
        if self.with(|s| s.fail_events) {
            return futures::stream::once(async {
                Err(RuntimeError::Api("event stream closed".into()))
            })
            .boxed();
        }
        let rx = self.events.subscribe();
        futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((Ok(event), rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
