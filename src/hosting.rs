//! The orchestrator: owns every shared handle and hands them to components.
//!
//! Nothing in the crate is process-global. Each component receives the
//! `Arc`s it needs from here, and per-session state lives in the session
//! task.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::activity::{ActivityMonitor, ActivityTracker, MonitorSettings};
use crate::config::HostingConfig;
use crate::errors::HostingError;
use crate::lifecycle::{LifecycleManager, LifecycleSettings};
use crate::naming::ContainerNameCache;
use crate::proxy::{ProxyRouter, ProxySettings};
use crate::reconcile::{self, ReconcileContext, Reconciler, RefreshBus};
use crate::runtime::ContainerRuntime;
use crate::source::SourceFetcher;
use crate::store::{Principal, ProjectStore};

pub struct Hosting {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub store: Arc<dyn ProjectStore>,
    pub names: Arc<ContainerNameCache>,
    pub tracker: Arc<ActivityTracker>,
    pub lifecycle: LifecycleManager,
    pub reconcile: Arc<ReconcileContext>,
    pub reconciler: Arc<dyn Reconciler>,
    pub refresh: RefreshBus,
    pub proxy: ProxyRouter,
    monitor_settings: MonitorSettings,
}

/// Result of an explicit project list refresh.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RefreshSummary {
    pub projects: usize,
    pub sessions: usize,
}

impl Hosting {
    pub fn new(
        config: &HostingConfig,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<dyn ProjectStore>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Result<Self> {
        let names = Arc::new(ContainerNameCache::new());
        let tracker = Arc::new(ActivityTracker::new());

        let lifecycle = LifecycleManager::new(
            runtime.clone(),
            store.clone(),
            fetcher,
            names.clone(),
            tracker.clone(),
            LifecycleSettings::from_config(config).context("Invalid runtime limits")?,
        );
        let reconcile = Arc::new(ReconcileContext {
            runtime: runtime.clone(),
            store: store.clone(),
            names: names.clone(),
            project_refresh: config.reconcile.project_refresh(),
        });
        let proxy = ProxyRouter::new(runtime.clone(), ProxySettings::from_config(config))
            .context("Failed to build proxy HTTP client")?;

        Ok(Self {
            runtime,
            store,
            names,
            tracker,
            lifecycle,
            reconcile,
            reconciler: reconcile::from_config(&config.reconcile),
            refresh: RefreshBus::default(),
            proxy,
            monitor_settings: MonitorSettings::from_config(&config.activity, &config.runtime),
        })
    }

    /// A monitor sharing this orchestrator's runtime and activity table.
    pub fn monitor(&self) -> ActivityMonitor {
        ActivityMonitor::new(
            self.runtime.clone(),
            self.tracker.clone(),
            self.monitor_settings.clone(),
        )
    }

    /// Re-list the caller's projects, refresh the name cache and tell the
    /// caller's live sessions to reload.
    pub async fn refresh_projects(&self, principal: &Principal) -> Result<RefreshSummary, HostingError> {
        let projects = self.store.list_projects(principal).await?;
        self.names.refresh_owner(&principal.owner, &projects);
        let sessions = self.refresh.notify(&principal.owner);
        tracing::info!(
            owner = %principal.owner,
            projects = projects.len(),
            sessions,
            "Project list refreshed"
        );
        Ok(RefreshSummary {
            projects: projects.len(),
            sessions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcileStrategy;
    use crate::runtime::fake::FakeRuntime;
    use crate::source::GitFetcher;
    use crate::store::StaticStore;
    use crate::store::tests::{principal, project};

    fn hosting(config: &HostingConfig) -> Hosting {
        let store = StaticStore::new(vec![project("p1", "app", "alice"), project("p2", "blog", "alice")]);
        Hosting::new(
            config,
            Arc::new(FakeRuntime::new()),
            Arc::new(store),
            Arc::new(GitFetcher::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_strategy_follows_config() {
        let mut config = HostingConfig::default();
        config.reconcile.strategy = ReconcileStrategy::Events;
        assert_eq!(hosting(&config).reconciler.strategy(), ReconcileStrategy::Events);
    }

    #[tokio::test]
    async fn test_refresh_fills_cache_and_notifies_sessions() {
        let hosting = hosting(&HostingConfig::default());
        let mut rx = hosting.refresh.subscribe();

        let summary = hosting.refresh_projects(&principal("alice")).await.unwrap();
        assert_eq!(summary, RefreshSummary { projects: 2, sessions: 1 });
        assert_eq!(hosting.names.len(), 2);
        assert_eq!(rx.recv().await.unwrap(), "alice");
    }
}
