//! Concurrent heartbeat emitter: writes `updated_at` every
//! `heartbeat_interval` until the runner exits (spec.md §4.G step 3).

use std::time::Duration;

use bgtask_registry::TaskRegistry;
use bgtask_types::TaskId;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub async fn emit_heartbeats(
    registry: TaskRegistry,
    task_id: TaskId,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {
                if let Err(err) = registry.update_heartbeat(task_id).await {
                    warn!(%task_id, %err, "heartbeat write failed, retrying next tick");
                }
            }
        }
    }
}
