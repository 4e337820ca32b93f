//! A single, long-lived cooperative task per server that sweeps this
//! server's and this server-type's owned tasks, reclaims stale ones,
//! and fails out those that have exhausted their retries (spec.md
//! §4.H).

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bgtask_events::EventPublisher;
use bgtask_hooks::{default_pipeline, TaskContext};
use bgtask_metrics::TaskMetricsObserver;
use bgtask_registry::TaskRegistry;
use bgtask_types::{ErrorCode, HandlerError, ServerId, ServerType, TaskId, TaskResult};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::TaskRunner;

/// True iff `now - ts > ttl` — a task whose heartbeat is within `ttl`
/// is never reclaimed (spec.md P6).
pub fn should_retry(last_heartbeat: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    match (now - last_heartbeat).to_std() {
        Ok(age) => age > ttl,
        Err(_) => false,
    }
}

/// In-process lookup cache of outstanding Runner handles, keyed by task
/// id. Owned by the Recovery Loop and the submitter; guarded by a mutex
/// rather than confined to one thread, since both sides may insert
/// concurrently (spec.md §5). It is a lookup index, not a source of
/// truth.
pub type OngoingTasks = Arc<StdMutex<HashMap<TaskId, JoinHandle<()>>>>;

pub struct RecoveryLoop {
    server_id: ServerId,
    server_type: ServerType,
    registry: TaskRegistry,
    runner: Arc<TaskRunner>,
    observer: Arc<dyn TaskMetricsObserver>,
    events: Arc<dyn EventPublisher>,
    ongoing: OngoingTasks,
    check_interval: Duration,
    staleness_threshold: Duration,
}

impl RecoveryLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_id: ServerId,
        server_type: ServerType,
        registry: TaskRegistry,
        runner: Arc<TaskRunner>,
        observer: Arc<dyn TaskMetricsObserver>,
        events: Arc<dyn EventPublisher>,
        ongoing: OngoingTasks,
        check_interval: Duration,
        staleness_threshold: Duration,
    ) -> Self {
        Self {
            server_id,
            server_type,
            registry,
            runner,
            observer,
            events,
            ongoing,
            check_interval,
            staleness_threshold,
        }
    }

    /// Runs the sweep loop until `cancel` fires. Cancellation waits for
    /// the current sweep to finish, then returns; the loop swallows its
    /// own cancellation during shutdown (spec.md §5).
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.check_interval) => {}
            }
            self.sweep_once().await;
        }
    }

    /// One sweep: reads both index sets, finds stale ids, and reclaims
    /// or fails each. Exposed separately from [`Self::run`] so tests
    /// can drive a single sweep deterministically.
    pub async fn sweep_once(&self) {
        let owned = match self.registry.get_server_tasks(&self.server_id).await {
            Ok(set) => set,
            Err(err) => {
                error!(%err, "recovery sweep failed to read server task set");
                BTreeSet::new()
            }
        };
        let grouped = match self.registry.get_server_type_tasks(&self.server_type).await {
            Ok(set) => set,
            Err(err) => {
                error!(%err, "recovery sweep failed to read server-type task set");
                BTreeSet::new()
            }
        };

        for task_id in owned.union(&grouped).copied() {
            if let Err(err) = self.handle_candidate(task_id).await {
                error!(%task_id, %err, "recovery sweep failed for task");
            }
        }
    }

    async fn handle_candidate(&self, task_id: TaskId) -> Result<(), anyhow::Error> {
        let Some(metadata) = self.registry.get_task(task_id).await? else {
            warn!(%task_id, "recovery sweep skipping task with no metadata");
            return Ok(());
        };

        let now = Utc::now();
        if !should_retry(metadata.updated_at, self.staleness_threshold, now) {
            return Ok(());
        }

        if metadata.retries_exhausted() {
            let pipeline = default_pipeline(self.observer.clone(), self.events.clone(), self.registry.clone());
            let ctx = TaskContext::new(metadata.task_name, task_id);
            pipeline
                .run(ctx, || async move {
                    TaskResult::Failed(HandlerError::with_code(
                        "max retries exceeded",
                        ErrorCode::internal_error(),
                    ))
                })
                .await;
            self.ongoing.lock().unwrap().remove(&task_id);
            return Ok(());
        }

        let reclaimed = metadata.for_reclaim(self.server_id.clone(), now);
        self.registry.update_task(&reclaimed).await?;
        self.registry
            .reassign_owner(
                task_id,
                &metadata.server_id,
                &self.server_id,
                Duration::from_secs(reclaimed.ttl_seconds),
            )
            .await?;
        self.observer.on_reclaim(metadata.task_name);

        let runner = self.runner.clone();
        let handle = tokio::spawn(async move {
            let _ = runner.run_task(task_id, CancellationToken::new()).await;
        });
        self.ongoing.lock().unwrap().insert(task_id, handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_retry_is_false_within_ttl() {
        let now = Utc::now();
        let recent = now - chrono::Duration::seconds(10);
        assert!(!should_retry(recent, Duration::from_secs(1_800), now));
    }

    #[test]
    fn should_retry_is_true_past_ttl() {
        let now = Utc::now();
        let stale = now - chrono::Duration::seconds(3_600);
        assert!(should_retry(stale, Duration::from_secs(1_800), now));
    }

    #[test]
    fn should_retry_boundary_is_exclusive() {
        let now = Utc::now();
        let exact = now - chrono::Duration::seconds(1_800);
        assert!(!should_retry(exact, Duration::from_secs(1_800), now));
    }

    use bgtask_events::BgtaskEventBus;
    use bgtask_handlers::HandlerRegistry;
    use bgtask_kv::MemoryKvStore;
    use bgtask_metrics::PrometheusTaskObserver;
    use bgtask_types::{TaskMetadata, TaskName};

    fn stale_metadata(task_id: TaskId, retry_count: u32, max_retries: u32) -> TaskMetadata {
        let mut m = TaskMetadata::new(
            task_id,
            TaskName::CloneVfolder,
            serde_json::json!({"src": "a", "dst": "b"})
                .as_object()
                .unwrap()
                .clone(),
            ServerId::new("S_dead"),
            ServerType::new("manager"),
            BTreeSet::new(),
            max_retries,
            86_400,
            Utc::now() - chrono::Duration::seconds(3_600),
        );
        m.retry_count = retry_count;
        m
    }

    fn loop_harness() -> (TaskRegistry, RecoveryLoop) {
        let registry = TaskRegistry::new(Arc::new(MemoryKvStore::new_isolated()));
        let events: Arc<dyn EventPublisher> =
            Arc::new(BgtaskEventBus::new(Duration::from_secs(60)));
        let observer: Arc<dyn TaskMetricsObserver> = Arc::new(PrometheusTaskObserver);
        let runner = Arc::new(crate::TaskRunner::new(
            registry.clone(),
            Arc::new(HandlerRegistry::new()),
            observer.clone(),
            events.clone(),
            Duration::from_secs(3_600),
        ));
        let recovery = RecoveryLoop::new(
            ServerId::new("S2"),
            ServerType::new("manager"),
            registry.clone(),
            runner,
            observer,
            events,
            Arc::new(StdMutex::new(HashMap::new())),
            Duration::from_secs(60),
            Duration::from_secs(1_800),
        );
        (registry, recovery)
    }

    #[tokio::test]
    async fn sweep_reclaims_stale_task_under_retry_limit() {
        let (registry, recovery) = loop_harness();
        let task_id = TaskId::new();
        registry.save_task(&stale_metadata(task_id, 0, 3)).await.unwrap();

        recovery.sweep_once().await;

        let updated = registry.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(updated.server_id, ServerId::new("S2"));
        assert_eq!(updated.retry_count, 1);
        assert!(registry
            .get_server_tasks(&ServerId::new("S2"))
            .await
            .unwrap()
            .contains(&task_id));
        assert!(recovery.ongoing.lock().unwrap().contains_key(&task_id));
    }

    #[tokio::test]
    async fn sweep_fails_task_that_exhausted_retries() {
        let (registry, recovery) = loop_harness();
        let task_id = TaskId::new();
        registry.save_task(&stale_metadata(task_id, 3, 3)).await.unwrap();

        recovery.sweep_once().await;

        assert!(registry.get_task(task_id).await.unwrap().is_none());
        assert!(!recovery.ongoing.lock().unwrap().contains_key(&task_id));
    }

    #[tokio::test]
    async fn sweep_ignores_task_with_fresh_heartbeat() {
        let (registry, recovery) = loop_harness();
        let task_id = TaskId::new();
        let mut fresh = stale_metadata(task_id, 0, 3);
        fresh.updated_at = Utc::now();
        registry.save_task(&fresh).await.unwrap();

        recovery.sweep_once().await;

        let unchanged = registry.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(unchanged.server_id, ServerId::new("S_dead"));
        assert_eq!(unchanged.retry_count, 0);
    }
}
