//! Idle detection and auto-shutdown.
//!
//! One background loop samples each running container's cumulative
//! received-byte counter. A counter that stops moving for longer than the
//! inactivity threshold gets the container stopped. Infrastructure
//! containers are never touched.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::{ActivitySection, RuntimeSection};
use crate::runtime::ContainerRuntime;

/// Last known network counter for one running container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityRecord {
    pub last_rx_bytes: u64,
    pub last_activity_time: Instant,
    pub inactive_since: Option<Instant>,
}

impl ActivityRecord {
    pub fn new(rx_bytes: u64, now: Instant) -> Self {
        Self {
            last_rx_bytes: rx_bytes,
            last_activity_time: now,
            inactive_since: None,
        }
    }
}

/// What one observation concluded about a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First sighting; a record was created.
    Tracking,
    /// Counter moved since the last sample.
    Active,
    /// Counter unchanged, threshold not yet reached.
    Idle { remaining: Duration },
    /// Idle for at least the threshold; the container should be stopped.
    Expired,
}

/// Container name → activity record, behind a single mutex.
///
/// Written by the monitor cycle and cleared by manual starts from request
/// handlers. The lock is never held across an await.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    records: Mutex<HashMap<String, ActivityRecord>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActivityRecord>> {
        // A poisoned table only ever holds plain data; keep using it.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<ActivityRecord> {
        self.lock().get(name).copied()
    }

    pub fn insert(&self, name: &str, record: ActivityRecord) {
        self.lock().insert(name.to_string(), record);
    }

    /// Drop the record for `name` so its idle clock restarts. Returns
    /// whether a record existed.
    pub fn reset(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fold one counter sample into the table.
    pub fn observe(&self, name: &str, rx_bytes: u64, now: Instant, threshold: Duration) -> Verdict {
        let mut records = self.lock();
        let Some(record) = records.get_mut(name) else {
            records.insert(name.to_string(), ActivityRecord::new(rx_bytes, now));
            return Verdict::Tracking;
        };

        // A counter that went backwards means the container restarted,
        // which counts as activity too.
        if rx_bytes != record.last_rx_bytes {
            *record = ActivityRecord::new(rx_bytes, now);
            return Verdict::Active;
        }

        match record.inactive_since {
            None => {
                record.inactive_since = Some(now);
                Verdict::Idle { remaining: threshold }
            }
            Some(since) => {
                let idle = now.saturating_duration_since(since);
                if idle >= threshold {
                    Verdict::Expired
                } else {
                    Verdict::Idle {
                        remaining: threshold - idle,
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    pub threshold: Duration,
    pub stop_grace: Duration,
    pub infrastructure: HashSet<String>,
    pub reserved_prefix: String,
}

impl MonitorSettings {
    pub fn from_config(activity: &ActivitySection, runtime: &RuntimeSection) -> Self {
        Self {
            check_interval: activity.check_interval(),
            threshold: activity.inactivity_threshold(),
            stop_grace: runtime.stop_grace(),
            infrastructure: activity.infrastructure.iter().cloned().collect(),
            reserved_prefix: activity.reserved_prefix.clone(),
        }
    }

    pub fn is_exempt(&self, name: &str) -> bool {
        self.infrastructure.contains(name)
            || (!self.reserved_prefix.is_empty() && name.starts_with(&self.reserved_prefix))
    }
}

/// Outcome of one monitor cycle, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub checked: usize,
    pub exempt: usize,
    pub stopped: Vec<String>,
    pub failed: Vec<String>,
}

pub struct ActivityMonitor {
    runtime: Arc<dyn ContainerRuntime>,
    tracker: Arc<ActivityTracker>,
    settings: MonitorSettings,
}

impl ActivityMonitor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        tracker: Arc<ActivityTracker>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            runtime,
            tracker,
            settings,
        }
    }

    /// Run one sampling pass. Failures are isolated per container.
    pub async fn run_cycle(&self, now: Instant) -> CycleReport {
        let mut report = CycleReport::default();
        let running = match self.runtime.list_running().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "Activity check could not list containers");
                return report;
            }
        };

        let mut expired = Vec::new();
        for name in running {
            if self.settings.is_exempt(&name) {
                report.exempt += 1;
                continue;
            }
            report.checked += 1;

            let rx_bytes = match self.runtime.stats(&name).await {
                Ok(stats) => stats.rx_bytes,
                Err(e) => {
                    tracing::debug!(container = %name, error = %e, "No stats; counting as zero");
                    0
                }
            };

            match self
                .tracker
                .observe(&name, rx_bytes, now, self.settings.threshold)
            {
                Verdict::Tracking => {
                    tracing::debug!(container = %name, rx_bytes, "Tracking container")
                }
                Verdict::Active => tracing::debug!(container = %name, rx_bytes, "Activity detected"),
                Verdict::Idle { remaining } => tracing::debug!(
                    container = %name,
                    remaining_secs = remaining.as_secs(),
                    "Container idle"
                ),
                Verdict::Expired => expired.push(name),
            }
        }

        for name in expired {
            tracing::info!(container = %name, "Stopping idle container");
            match self
                .runtime
                .stop_container(&name, self.settings.stop_grace)
                .await
            {
                Ok(()) => {
                    self.tracker.reset(&name);
                    report.stopped.push(name);
                }
                Err(e) => {
                    tracing::warn!(container = %name, error = %e, "Failed to stop idle container");
                    report.failed.push(name);
                }
            }
        }
        report
    }

    /// Loop until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.settings.check_interval.as_secs(),
            threshold_secs = self.settings.threshold.as_secs(),
            "Activity monitor started"
        );
        let mut ticker = tokio::time::interval(self.settings.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.run_cycle(Instant::now()).await;
                    if !report.stopped.is_empty() || !report.failed.is_empty() {
                        tracing::info!(
                            checked = report.checked,
                            stopped = report.stopped.len(),
                            failed = report.failed.len(),
                            "Activity cycle finished"
                        );
                    }
                }
            }
        }
        tracing::info!("Activity monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContainerStatus;
    use crate::runtime::StatsSample;
    use crate::runtime::fake::FakeRuntime;

    const THRESHOLD: Duration = Duration::from_secs(1800);

    fn settings() -> MonitorSettings {
        MonitorSettings {
            check_interval: Duration::from_secs(30),
            threshold: THRESHOLD,
            stop_grace: Duration::from_secs(10),
            infrastructure: ["nginx-1".to_string()].into_iter().collect(),
            reserved_prefix: "hosting_project-".to_string(),
        }
    }

    fn rx(bytes: u64) -> StatsSample {
        StatsSample {
            rx_bytes: bytes,
            ..StatsSample::default()
        }
    }

    fn idle_since(since: Instant, bytes: u64) -> ActivityRecord {
        ActivityRecord {
            last_rx_bytes: bytes,
            last_activity_time: since,
            inactive_since: Some(since),
        }
    }

    fn monitor(fake: &Arc<FakeRuntime>, tracker: &Arc<ActivityTracker>) -> ActivityMonitor {
        ActivityMonitor::new(fake.clone(), tracker.clone(), settings())
    }

    #[test]
    fn test_observe_state_machine() {
        let tracker = ActivityTracker::new();
        let t0 = Instant::now();

        assert_eq!(tracker.observe("a", 100, t0, THRESHOLD), Verdict::Tracking);
        assert_eq!(
            tracker.observe("a", 100, t0 + Duration::from_secs(30), THRESHOLD),
            Verdict::Idle { remaining: THRESHOLD }
        );
        assert!(tracker.get("a").unwrap().inactive_since.is_some());

        let later = t0 + Duration::from_secs(60);
        assert_eq!(tracker.observe("a", 150, later, THRESHOLD), Verdict::Active);
        let record = tracker.get("a").unwrap();
        assert_eq!(record.last_rx_bytes, 150);
        assert_eq!(record.last_activity_time, later);
        assert!(record.inactive_since.is_none());
    }

    #[test]
    fn test_observe_expires_at_threshold() {
        let tracker = ActivityTracker::new();
        let t0 = Instant::now();
        tracker.insert("a", idle_since(t0, 10));

        assert_eq!(
            tracker.observe("a", 10, t0 + THRESHOLD - Duration::from_secs(1), THRESHOLD),
            Verdict::Idle {
                remaining: Duration::from_secs(1)
            }
        );
        assert_eq!(tracker.observe("a", 10, t0 + THRESHOLD, THRESHOLD), Verdict::Expired);
    }

    #[tokio::test]
    async fn test_cycle_stops_only_expired_container() {
        let fake = Arc::new(FakeRuntime::new());
        let tracker = Arc::new(ActivityTracker::new());
        fake.add_container("app-alice", ContainerStatus::Running);
        fake.add_container("nginx-1", ContainerStatus::Running);
        fake.add_container("hosting_project-ui-1", ContainerStatus::Running);
        for name in ["app-alice", "nginx-1", "hosting_project-ui-1"] {
            fake.set_stats(name, rx(500));
        }

        let t0 = Instant::now();
        tracker.insert("app-alice", idle_since(t0, 500));
        tracker.insert("nginx-1", idle_since(t0, 500));
        tracker.insert("hosting_project-ui-1", idle_since(t0, 500));

        let now = t0 + THRESHOLD + Duration::from_secs(1);
        let report = monitor(&fake, &tracker).run_cycle(now).await;

        assert_eq!(report.stopped, vec!["app-alice".to_string()]);
        assert_eq!(report.exempt, 2);
        assert_eq!(fake.status_of("app-alice"), Some(ContainerStatus::Exited));
        assert_eq!(fake.status_of("nginx-1"), Some(ContainerStatus::Running));
        assert_eq!(
            fake.status_of("hosting_project-ui-1"),
            Some(ContainerStatus::Running)
        );
        assert!(tracker.get("app-alice").is_none());
    }

    #[tokio::test]
    async fn test_cycle_first_sighting_creates_record_without_judgment() {
        let fake = Arc::new(FakeRuntime::new());
        let tracker = Arc::new(ActivityTracker::new());
        fake.add_container("app-alice", ContainerStatus::Running);
        fake.set_stats("app-alice", rx(42));

        let report = monitor(&fake, &tracker).run_cycle(Instant::now()).await;
        assert!(report.stopped.is_empty());
        let record = tracker.get("app-alice").unwrap();
        assert_eq!(record.last_rx_bytes, 42);
        assert!(record.inactive_since.is_none());
    }

    #[tokio::test]
    async fn test_cycle_isolates_failures() {
        let fake = Arc::new(FakeRuntime::new());
        let tracker = Arc::new(ActivityTracker::new());
        fake.add_container("a-one", ContainerStatus::Running);
        fake.add_container("b-two", ContainerStatus::Running);
        fake.fail_stats("a-one");
        fake.fail_stop("a-one");
        fake.set_stats("b-two", rx(0));

        let t0 = Instant::now();
        tracker.insert("a-one", idle_since(t0, 0));
        tracker.insert("b-two", idle_since(t0, 0));

        let now = t0 + THRESHOLD + Duration::from_secs(1);
        let report = monitor(&fake, &tracker).run_cycle(now).await;

        assert_eq!(report.failed, vec!["a-one".to_string()]);
        assert_eq!(report.stopped, vec!["b-two".to_string()]);
        // The failed stop keeps its record for the next cycle.
        assert!(tracker.get("a-one").is_some());
    }

    #[tokio::test]
    async fn test_run_exits_on_cancel() {
        let fake = Arc::new(FakeRuntime::new());
        let tracker = Arc::new(ActivityTracker::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor(&fake, &tracker).run(cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
