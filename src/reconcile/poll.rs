use std::time::Duration;

use async_trait::async_trait;

use super::{Control, ReconcileContext, Reconciler, Session, metrics};
use crate::config::ReconcileStrategy;

/// Re-inspect every session container on a fixed tick and emit the diffs.
#[derive(Debug, Clone)]
pub struct PollReconciler {
    interval: Duration,
}

impl PollReconciler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// One pass over the session's projects. `false` if the client left.
    async fn tick(&self, ctx: &ReconcileContext, session: &mut Session) -> bool {
        let projects = session.view.projects().to_vec();
        for project in &projects {
            let name = crate::naming::resolve(&project.public_url);
            let (status, sample) = metrics::observe(ctx.runtime.as_ref(), &name).await;

            if let Some(event) = session.view.observe_status(project, status)
                && !session.emit(event).await
            {
                return false;
            }
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
impl Reconciler for PollReconciler {
    fn strategy(&self) -> ReconcileStrategy {
        ReconcileStrategy::Poll
    }

    async fn run(&self, ctx: &ReconcileContext, session: &mut Session) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                control = session.control() => match control {
                    Control::Closed => break,
                    Control::Reload => ctx.reload(session).await,
                },
                _ = ticker.tick() => {
                    if !self.tick(ctx, session).await {
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
    use crate::models::{ContainerStatus, StreamEvent};
    use crate::reconcile::{RefreshBus, run_session};
    use crate::runtime::fake::FakeRuntime;
    use crate::store::StaticStore;
    use crate::store::tests::{principal, project};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_poll_emits_only_own_projects_and_changes() {
        let fake = Arc::new(FakeRuntime::new());
        fake.add_container("app-alice", ContainerStatus::Running);
        fake.add_container("blog-bob", ContainerStatus::Running);
        let ctx = crate::reconcile::tests::context(
            &fake,
            StaticStore::new(vec![
                project("p1", "app", "alice"),
                project("p2", "blog", "bob"),
            ]),
        );

        let bus = RefreshBus::default();
        let (tx, mut rx) = mpsc::channel(64);
        let session = tokio::spawn(run_session(
            ctx,
            Arc::new(PollReconciler::new(Duration::from_millis(10))),
            principal("alice"),
            bus.subscribe(),
            tx,
        ));

        // Several ticks with no change in between.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(rx.recv().await.unwrap().event_type(), "connected");

        let mut statuses = Vec::new();
        let mut metrics = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                StreamEvent::ContainerStatusChanged(change) => statuses.push(change),
                StreamEvent::MetricsUpdated(update) => {
                    assert_eq!(update.project_id, "p1");
                    metrics += 1;
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].project_id, "p1");
        assert_eq!(statuses[0].status, ContainerStatus::Running);
        assert_eq!(metrics, 1);

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
    }
}
