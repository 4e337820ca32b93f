//! Claim a task id, resolve its handler, run it inside the Hook
//! Pipeline, and record the result (spec.md §4.G).

use std::sync::Arc;
use std::time::Duration;

use bgtask_events::EventPublisher;
use bgtask_handlers::HandlerRegistry;
use bgtask_hooks::{default_pipeline, TaskContext};
use bgtask_metrics::TaskMetricsObserver;
use bgtask_registry::TaskRegistry;
use bgtask_types::{BgtaskError, ErrorCode, HandlerError, TaskId, TaskResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Converts a dispatch failure from the Handler Registry into the
/// `Failed` result the Hook Pipeline observes. `BgtaskNotRegistered`
/// and `InvalidTaskMetadata` both carry the generic internal-error
/// code per scenario S6; `HandlerFailure` preserves whatever code the
/// handler itself attached.
fn dispatch_error_to_result(err: BgtaskError) -> TaskResult {
    match err {
        BgtaskError::HandlerFailure(handler_err) => TaskResult::Failed(handler_err),
        BgtaskError::BgtaskNotRegistered(name) => TaskResult::Failed(HandlerError::with_code(
            format!("no handler registered for task name {name}"),
            ErrorCode::internal_error(),
        )),
        BgtaskError::InvalidTaskMetadata(msg) => TaskResult::Failed(HandlerError::with_code(
            format!("invalid task metadata: {msg}"),
            ErrorCode::internal_error(),
        )),
        other => TaskResult::Failed(HandlerError::with_code(
            other.to_string(),
            ErrorCode::internal_error(),
        )),
    }
}

/// Runs one task id to completion. Stateless between calls — every
/// `run_task` invocation builds its own heartbeat emitter and hook
/// pipeline instances.
pub struct TaskRunner {
    registry: TaskRegistry,
    handlers: Arc<HandlerRegistry>,
    observer: Arc<dyn TaskMetricsObserver>,
    events: Arc<dyn EventPublisher>,
    heartbeat_interval: Duration,
}

impl TaskRunner {
    pub fn new(
        registry: TaskRegistry,
        handlers: Arc<HandlerRegistry>,
        observer: Arc<dyn TaskMetricsObserver>,
        events: Arc<dyn EventPublisher>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            registry,
            handlers,
            observer,
            events,
            heartbeat_interval,
        }
    }

    /// Runs `task_id` to completion and returns its result. Absent
    /// metadata aborts with a log line and no pipeline entry at all —
    /// there is no task name to attribute a result to.
    pub async fn run_task(&self, task_id: TaskId, cancel: CancellationToken) -> Option<TaskResult> {
        let metadata = match self.registry.get_task(task_id).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                warn!(%task_id, "run_task aborted: metadata absent");
                return None;
            }
            Err(err) => {
                warn!(%task_id, %err, "run_task aborted: registry read failed");
                return None;
            }
        };

        let heartbeat_cancel = CancellationToken::new();
        let heartbeat_handle = tokio::spawn(crate::heartbeat::emit_heartbeats(
            self.registry.clone(),
            task_id,
            self.heartbeat_interval,
            heartbeat_cancel.clone(),
        ));

        let pipeline = default_pipeline(self.observer.clone(), self.events.clone(), self.registry.clone());
        let ctx = TaskContext::new(metadata.task_name, task_id);
        let handlers = self.handlers.clone();
        let body_cancel = cancel.clone();
        let body = serde_json::Value::Object(metadata.body.clone());
        let task_name = metadata.task_name;

        let ctx = pipeline
            .run(ctx, move || async move {
                run_body(handlers, task_name, body, body_cancel).await
            })
            .await;

        heartbeat_cancel.cancel();
        let _ = heartbeat_handle.await;

        ctx.result
    }
}

async fn run_body(
    handlers: Arc<HandlerRegistry>,
    task_name: bgtask_types::TaskName,
    body: Value,
    cancel: CancellationToken,
) -> TaskResult {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => TaskResult::Cancelled("Task cancelled".to_string()),
        result = handlers.revive_task(task_name, body, cancel.clone()) => {
            match result {
                Ok(value) => TaskResult::Success(value),
                Err(err) => dispatch_error_to_result(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bgtask_events::BgtaskEventBus;
    use bgtask_kv::MemoryKvStore;
    use bgtask_metrics::PrometheusTaskObserver;
    use bgtask_types::{ServerId, ServerType, TaskMetadata, TaskName};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::str::FromStr;
    use tokio::sync::Notify;

    #[derive(serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    struct CloneArgs {
        src: String,
        dst: String,
    }

    struct CloneHandler {
        started: Arc<Notify>,
        block: bool,
    }

    #[async_trait]
    impl bgtask_handlers::BackgroundTaskHandler for CloneHandler {
        type Args = CloneArgs;

        fn name(&self) -> TaskName {
            TaskName::CloneVfolder
        }

        async fn execute(
            &self,
            args: Self::Args,
            cancel: CancellationToken,
        ) -> Result<Value, HandlerError> {
            self.started.notify_one();
            if self.block {
                cancel.cancelled().await;
                return Err(HandlerError::new("should have been cancelled first"));
            }
            Ok(serde_json::json!({"src": args.src, "dst": args.dst}))
        }
    }

    fn metadata(task_id: TaskId, retry_count: u32, max_retries: u32) -> TaskMetadata {
        let mut m = TaskMetadata::new(
            task_id,
            TaskName::CloneVfolder,
            serde_json::json!({"src": "a", "dst": "b"})
                .as_object()
                .unwrap()
                .clone(),
            ServerId::new("S1"),
            ServerType::new("manager"),
            BTreeSet::new(),
            max_retries,
            86_400,
            Utc::now(),
        );
        m.retry_count = retry_count;
        m
    }

    fn harness() -> (TaskRegistry, Arc<dyn EventPublisher>, Arc<dyn TaskMetricsObserver>) {
        let registry = TaskRegistry::new(Arc::new(MemoryKvStore::new_isolated()));
        let events: Arc<dyn EventPublisher> =
            Arc::new(BgtaskEventBus::new(Duration::from_secs(60)));
        let observer: Arc<dyn TaskMetricsObserver> = Arc::new(PrometheusTaskObserver);
        (registry, events, observer)
    }

    #[tokio::test]
    async fn run_task_on_success_returns_success_and_unregisters() {
        let (registry, events, observer) = harness();
        let task_id = TaskId::new();
        registry.save_task(&metadata(task_id, 0, 3)).await.unwrap();

        let mut handlers = HandlerRegistry::new();
        handlers.register(CloneHandler {
            started: Arc::new(Notify::new()),
            block: false,
        });

        let runner = TaskRunner::new(
            registry.clone(),
            Arc::new(handlers),
            observer,
            events,
            Duration::from_secs(3600),
        );
        let result = runner.run_task(task_id, CancellationToken::new()).await.unwrap();
        assert!(matches!(result, TaskResult::Success(_)));
        assert!(registry.get_task(task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_task_cancelled_mid_flight_yields_cancelled() {
        let (registry, events, observer) = harness();
        let task_id = TaskId::new();
        registry.save_task(&metadata(task_id, 0, 3)).await.unwrap();

        let started = Arc::new(Notify::new());
        let mut handlers = HandlerRegistry::new();
        handlers.register(CloneHandler {
            started: started.clone(),
            block: true,
        });

        let runner = Arc::new(TaskRunner::new(
            registry.clone(),
            Arc::new(handlers),
            observer,
            events,
            Duration::from_secs(3600),
        ));
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let runner_clone = runner.clone();
        let handle = tokio::spawn(async move { runner_clone.run_task(task_id, run_cancel).await });

        started.notified().await;
        cancel.cancel();
        let result = handle.await.unwrap().unwrap();
        assert!(matches!(result, TaskResult::Cancelled(_)));
    }

    #[tokio::test]
    async fn run_task_with_unregistered_handler_yields_failed_and_unregisters() {
        let (registry, events, observer) = harness();
        let task_id = TaskId::new();
        let mut meta = metadata(task_id, 0, 3);
        meta.task_name = TaskName::PushImage;
        registry.save_task(&meta).await.unwrap();

        let handlers = HandlerRegistry::new();
        let runner = TaskRunner::new(
            registry.clone(),
            Arc::new(handlers),
            observer,
            events,
            Duration::from_secs(3600),
        );
        let result = runner.run_task(task_id, CancellationToken::new()).await.unwrap();
        match result {
            TaskResult::Failed(err) => {
                assert_eq!(err.code, Some(ErrorCode::internal_error()));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(registry.get_task(task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_task_on_absent_metadata_aborts_with_no_result() {
        let (registry, events, observer) = harness();
        let handlers = HandlerRegistry::new();
        let runner = TaskRunner::new(registry, Arc::new(handlers), observer, events, Duration::from_secs(3600));
        let missing = TaskId::from_str("00000000-0000-0000-0000-000000000042").unwrap();
        assert!(runner.run_task(missing, CancellationToken::new()).await.is_none());
    }
}
