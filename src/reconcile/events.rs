use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Control, ReconcileContext, Reconciler, Session, metrics};
use crate::config::ReconcileStrategy;
use crate::models::ContainerStatus;
use crate::runtime::{ContainerRuntime, RuntimeEvent};

/// Follow the runtime's event feed for status changes; sample metrics on
/// a fixed interval.
#[derive(Debug, Clone)]
pub struct EventFeedReconciler {
    metrics_interval: Duration,
    queue_capacity: usize,
}

/// Aborts the listener task when the session loop exits, which drops the
/// runtime subscription with it.
struct ListenerGuard(JoinHandle<()>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn spawn_listener(runtime: &dyn ContainerRuntime, capacity: usize) -> (ListenerGuard, mpsc::Receiver<RuntimeEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    let mut feed = runtime.events();
    let handle = tokio::spawn(async move {
        while let Some(item) = feed.next().await {
            match item {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Runtime event feed failed");
                    break;
                }
            }
        }
    });
    (ListenerGuard(handle), rx)
}

impl EventFeedReconciler {
    pub fn new(metrics_interval: Duration, queue_capacity: usize) -> Self {
        Self {
            metrics_interval,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Inspect every project once. Sent at session start and after each
    /// reload so newly listed projects get their first observation; known
    /// projects only emit if their status moved.
    async fn scan_statuses(&self, ctx: &ReconcileContext, session: &mut Session) -> bool {
        let projects = session.view.projects().to_vec();
        for project in &projects {
            let name = crate::naming::resolve(&project.public_url);
            let (status, _) = metrics::observe(ctx.runtime.as_ref(), &name).await;
            if let Some(event) = session.view.observe_status(project, status)
                && !session.emit(event).await
            {
                return false;
            }
        }
        true
    }

    async fn apply_event(&self, session: &mut Session, event: RuntimeEvent) -> bool {
        let Some(status) = ContainerStatus::from_event_action(&event.action) else {
            return true;
        };
        let Some(project) = session
            .view
            .project_for_container(&event.container_name)
            .cloned()
        else {
            return true;
        };
        match session.view.observe_status(&project, status) {
            Some(change) => session.emit(change).await,
            None => true,
        }
    }

    async fn emit_metrics(&self, ctx: &ReconcileContext, session: &mut Session) -> bool {
        let projects = session.view.projects().to_vec();
        for project in &projects {
            let name = crate::naming::resolve(&project.public_url);
            let (_, sample) = metrics::observe(ctx.runtime.as_ref(), &name).await;
            if let Some(event) = session.view.observe_metrics(&project.id, sample)
                && !session.emit(event).await
            {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl Reconciler for EventFeedReconciler {
    fn strategy(&self) -> ReconcileStrategy {
        ReconcileStrategy::Events
    }

    async fn run(&self, ctx: &ReconcileContext, session: &mut Session) {
        // Subscribe before the initial scan so no transition slips between.
        let (_listener, mut feed) = spawn_listener(ctx.runtime.as_ref(), self.queue_capacity);
        let mut feed_open = true;

        if !self.scan_statuses(ctx, session).await {
            return;
        }

        let mut next_metrics = tokio::time::Instant::now();
        loop {
            tokio::select! {
                control = session.control() => match control {
                    Control::Closed => break,
                    Control::Reload => {
                        ctx.reload(session).await;
                        if !self.scan_statuses(ctx, session).await {
                            break;
                        }
                    }
                },
                event = feed.recv(), if feed_open => match event {
                    Some(event) => {
                        if !self.apply_event(session, event).await {
                            break;
                        }
                    }
                    None => {
                        tracing::debug!(owner = %session.principal.owner, "Event feed ended; status updates paused");
                        feed_open = false;
                    }
                },
                _ = tokio::time::sleep_until(next_metrics) => {
                    next_metrics = tokio::time::Instant::now() + self.metrics_interval;
                    if !self.emit_metrics(ctx, session).await {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StreamEvent;
    use crate::reconcile::{RefreshBus, run_session};
    use crate::runtime::fake::FakeRuntime;
    use crate::store::StaticStore;
    use crate::store::tests::{principal, project};
    use std::sync::Arc;

    async fn wait_for<F: Fn() -> bool>(check: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn open(
        fake: &Arc<FakeRuntime>,
        rx_capacity: usize,
    ) -> (tokio::task::JoinHandle<()>, mpsc::Receiver<StreamEvent>) {
        let ctx = crate::reconcile::tests::context(
            fake,
            StaticStore::new(vec![
                project("p1", "app", "alice"),
                project("p2", "blog", "bob"),
            ]),
        );
        let bus = RefreshBus::default();
        let (tx, rx) = mpsc::channel(rx_capacity);
        let handle = tokio::spawn(run_session(
            ctx,
            Arc::new(EventFeedReconciler::new(Duration::from_secs(3600), 8)),
            principal("alice"),
            bus.subscribe(),
            tx,
        ));
        (handle, rx)
    }

    async fn next_status(rx: &mut mpsc::Receiver<StreamEvent>) -> crate::models::StatusChange {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("no event")
                .expect("stream closed");
            if let StreamEvent::ContainerStatusChanged(change) = event {
                return change;
            }
        }
    }

    #[tokio::test]
    async fn test_events_map_to_status_changes_for_own_projects() {
        let fake = Arc::new(FakeRuntime::new());
        fake.add_container("app-alice", ContainerStatus::Created);
        let (session, mut rx) = open(&fake, 64);

        let first = next_status(&mut rx).await;
        assert_eq!(first.status, ContainerStatus::Created);
        wait_for(|| fake.event_subscribers() == 1).await;

        fake.push_event("start", "blog-bob");
        fake.push_event("pause", "app-alice");
        fake.push_event("exec_start", "app-alice");
        fake.push_event("pause", "app-alice");
        fake.push_event("unpause", "app-alice");

        let paused = next_status(&mut rx).await;
        assert_eq!(paused.project_id, "p1");
        assert_eq!(paused.status, ContainerStatus::Inactive);
        assert_eq!(paused.previous_status, ContainerStatus::Created);

        let resumed = next_status(&mut rx).await;
        assert_eq!(resumed.status, ContainerStatus::Running);
        assert_eq!(resumed.previous_status, ContainerStatus::Inactive);

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_releases_subscription() {
        let fake = Arc::new(FakeRuntime::new());
        let (session, rx) = open(&fake, 64);
        wait_for(|| fake.event_subscribers() == 1).await;

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        wait_for(|| fake.event_subscribers() == 0).await;
    }

    #[tokio::test]
    async fn test_feed_failure_keeps_metrics_flowing() {
        let fake = Arc::new(FakeRuntime::new());
        fake.fail_events();
        fake.add_container("app-alice", ContainerStatus::Running);

        let ctx = crate::reconcile::tests::context(
            &fake,
            StaticStore::new(vec![project("p1", "app", "alice")]),
        );
        let bus = RefreshBus::default();
        let (tx, mut rx) = mpsc::channel(64);
        let session = tokio::spawn(run_session(
            ctx,
            Arc::new(EventFeedReconciler::new(Duration::from_millis(10), 8)),
            principal("alice"),
            bus.subscribe(),
            tx,
        ));

        assert_eq!(next_status(&mut rx).await.status, ContainerStatus::Running);

        // A change in traffic still shows up as a metrics update.
        fake.set_stats(
            "app-alice",
            crate::runtime::StatsSample {
                rx_packets: 5,
                ..Default::default()
            },
        );
        let mut saw_requests = false;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            if let StreamEvent::MetricsUpdated(update) = event
                && update.metrics.requests == 5
            {
                saw_requests = true;
                break;
            }
        }
        assert!(saw_requests);
        assert!(!session.is_finished());

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
    }
}
