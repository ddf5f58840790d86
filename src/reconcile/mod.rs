//! Live status/metrics reconciliation for client sessions.
//!
//! Each connected client gets a [`Session`] holding its own [`SessionView`].
//! A [`Reconciler`] compares freshly observed runtime state against the view
//! and pushes only changed facts. Two strategies exist:
//!
//! - [`poll::PollReconciler`]: inspect every container on a fixed tick
//! - [`events::EventFeedReconciler`]: follow the runtime event feed, with
//!   metrics on their own interval
//!
//! Both produce the same event vocabulary and dedup rules.

pub mod events;
pub mod metrics;
pub mod poll;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::config::{ReconcileSection, ReconcileStrategy};
use crate::models::{
    ContainerStatus, MetricsSample, MetricsUpdate, Project, StatusChange, StreamEvent,
    utc_timestamp,
};
use crate::naming::{self, ContainerNameCache};
use crate::runtime::ContainerRuntime;
use crate::store::{Principal, ProjectStore};

pub use events::EventFeedReconciler;
pub use poll::PollReconciler;

/// Error code sent when a session cannot load its project list.
pub const FETCH_ERROR_CODE: &str = "CONTAINERS_FETCH_ERROR";

// ── Session view ────────────────────────────────────────────────────

/// What one client has been told so far.
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    owner: String,
    projects: Vec<Project>,
    /// container name → project id
    by_container: HashMap<String, String>,
    previous_statuses: HashMap<String, ContainerStatus>,
    previous_metrics: HashMap<String, MetricsSample>,
}

impl SessionView {
    pub fn new(owner: &str, projects: Vec<Project>) -> Self {
        let mut view = Self {
            owner: owner.to_string(),
            ..Self::default()
        };
        view.replace_projects(projects);
        view
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Swap in a fresh project list. History is kept for projects that
    /// survive and dropped for the rest. Rows for other owners are ignored.
    pub fn replace_projects(&mut self, projects: Vec<Project>) {
        let projects: Vec<Project> = projects
            .into_iter()
            .filter(|p| p.owner == self.owner)
            .collect();
        self.by_container = projects
            .iter()
            .map(|p| (naming::resolve(&p.public_url), p.id.clone()))
            .collect();
        self.previous_statuses
            .retain(|id, _| projects.iter().any(|p| &p.id == id));
        self.previous_metrics
            .retain(|id, _| projects.iter().any(|p| &p.id == id));
        self.projects = projects;
    }

    /// The session's project whose container carries `name`.
    pub fn project_for_container(&self, name: &str) -> Option<&Project> {
        let id = self.by_container.get(name)?;
        self.projects.iter().find(|p| &p.id == id)
    }

    /// Record a status observation. Returns an event only when it differs
    /// from the last one recorded; the first observation always differs.
    pub fn observe_status(&mut self, project: &Project, status: ContainerStatus) -> Option<StreamEvent> {
        let previous = self.previous_statuses.insert(project.id.clone(), status);
        if previous == Some(status) {
            return None;
        }
        Some(StreamEvent::ContainerStatusChanged(StatusChange {
            project_id: project.id.clone(),
            status,
            previous_status: previous.unwrap_or_default(),
            name: project.name.clone(),
            timestamp: utc_timestamp(),
        }))
    }

    /// Record a metrics observation, deduplicated on the metric values.
    pub fn observe_metrics(&mut self, project_id: &str, sample: MetricsSample) -> Option<StreamEvent> {
        if self.previous_metrics.get(project_id) == Some(&sample) {
            return None;
        }
        self.previous_metrics
            .insert(project_id.to_string(), sample.clone());
        Some(StreamEvent::MetricsUpdated(MetricsUpdate {
            project_id: project_id.to_string(),
            metrics: sample.into_payload(utc_timestamp()),
        }))
    }

    pub fn last_status(&self, project_id: &str) -> Option<ContainerStatus> {
        self.previous_statuses.get(project_id).copied()
    }
}

// ── Refresh notifications ───────────────────────────────────────────

/// Fan-out of "owner X refreshed their project list" to live sessions.
#[derive(Debug, Clone)]
pub struct RefreshBus {
    tx: broadcast::Sender<String>,
}

impl Default for RefreshBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }
}

impl RefreshBus {
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Returns the number of sessions notified.
    pub fn notify(&self, owner: &str) -> usize {
        self.tx.send(owner.to_string()).unwrap_or(0)
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Shared handles every session reads from.
pub struct ReconcileContext {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub store: Arc<dyn ProjectStore>,
    pub names: Arc<ContainerNameCache>,
    pub project_refresh: Duration,
}

impl ReconcileContext {
    /// Re-list the session owner's projects. On failure the old list stays.
    pub async fn reload(&self, session: &mut Session) {
        match self.store.list_projects(&session.principal).await {
            Ok(projects) => {
                self.names.refresh_owner(&session.principal.owner, &projects);
                session.view.replace_projects(projects);
                tracing::debug!(
                    owner = %session.principal.owner,
                    projects = session.view.projects().len(),
                    "Session project list reloaded"
                );
            }
            Err(e) => {
                tracing::warn!(owner = %session.principal.owner, error = %e, "Project reload failed")
            }
        }
    }
}

/// Something other than reconciliation work that a session loop must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// The client went away.
    Closed,
    /// The project list should be re-read.
    Reload,
}

/// One client's live stream.
pub struct Session {
    pub principal: Principal,
    pub view: SessionView,
    sink: mpsc::Sender<StreamEvent>,
    refresh: Option<broadcast::Receiver<String>>,
    reload_ticker: tokio::time::Interval,
}

impl Session {
    pub fn new(
        principal: Principal,
        projects: Vec<Project>,
        sink: mpsc::Sender<StreamEvent>,
        refresh: broadcast::Receiver<String>,
        project_refresh: Duration,
    ) -> Self {
        let view = SessionView::new(&principal.owner, projects);
        let start = tokio::time::Instant::now() + project_refresh;
        let mut reload_ticker = tokio::time::interval_at(start, project_refresh);
        reload_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Self {
            principal,
            view,
            sink,
            refresh: Some(refresh),
            reload_ticker,
        }
    }

    /// Push one event. `false` once the client has disconnected.
    pub async fn emit(&self, event: StreamEvent) -> bool {
        self.sink.send(event).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    /// Wait for a disconnect or a reason to reload projects. Cancel safe.
    pub async fn control(&mut self) -> Control {
        loop {
            let slot = &mut self.refresh;
            let refresh = async move {
                match slot.as_mut() {
                    Some(rx) => Some(rx.recv().await),
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = self.sink.closed() => return Control::Closed,
                _ = self.reload_ticker.tick() => return Control::Reload,
                msg = refresh => match msg {
                    Some(Ok(owner)) if owner == self.principal.owner => return Control::Reload,
                    Some(Ok(_)) => continue,
                    Some(Err(broadcast::error::RecvError::Lagged(_))) => return Control::Reload,
                    Some(Err(broadcast::error::RecvError::Closed)) | None => {
                        self.refresh = None;
                        continue;
                    }
                },
            }
        }
    }
}

/// A strategy that keeps one session's view in step with the runtime.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn strategy(&self) -> ReconcileStrategy;

    /// Drive the session until the client disconnects.
    async fn run(&self, ctx: &ReconcileContext, session: &mut Session);
}

/// Build the reconciler selected in configuration.
pub fn from_config(section: &ReconcileSection) -> Arc<dyn Reconciler> {
    match section.strategy {
        ReconcileStrategy::Poll => Arc::new(PollReconciler::new(section.poll_interval())),
        ReconcileStrategy::Events => Arc::new(EventFeedReconciler::new(
            section.metrics_interval(),
            section.event_queue_capacity,
        )),
    }
}

/// Full lifetime of one client stream: greet, load projects, reconcile
/// until the receiver side of `sink` is dropped.
pub async fn run_session(
    ctx: Arc<ReconcileContext>,
    reconciler: Arc<dyn Reconciler>,
    principal: Principal,
    refresh: broadcast::Receiver<String>,
    sink: mpsc::Sender<StreamEvent>,
) {
    let hello = StreamEvent::Connected {
        message: "Connected to container events".to_string(),
        owner: principal.owner.clone(),
    };
    if sink.send(hello).await.is_err() {
        return;
    }

    let projects = match ctx.store.list_projects(&principal).await {
        Ok(projects) => projects,
        Err(e) => {
            tracing::warn!(owner = %principal.owner, error = %e, "Session could not list projects");
            let _ = sink
                .send(StreamEvent::error(
                    format!("Failed to fetch containers: {}", e),
                    FETCH_ERROR_CODE,
                ))
                .await;
            return;
        }
    };
    ctx.names.refresh_owner(&principal.owner, &projects);

    let owner = principal.owner.clone();
    tracing::info!(
        owner = %owner,
        projects = projects.len(),
        strategy = %reconciler.strategy(),
        "Session opened"
    );
    let mut session = Session::new(principal, projects, sink, refresh, ctx.project_refresh);
    reconciler.run(&ctx, &mut session).await;
    tracing::info!(owner = %owner, "Session closed");
}
