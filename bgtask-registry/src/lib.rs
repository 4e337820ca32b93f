//! Persistence and indexing of task metadata in the shared KV store
//! (spec.md §4.C), atop the narrow [`bgtask_kv::KvStore`] contract.

mod error;

pub use error::RegistryError;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bgtask_kv::KvStore;
use bgtask_types::{ServerId, ServerType, TaskId, TaskMetadata};
use chrono::Utc;
use tracing::warn;

fn task_key(task_id: TaskId) -> String {
    format!("bgtask:task:{task_id}")
}

fn server_key(server_id: &ServerId) -> String {
    format!("bgtask:server:{}", server_id.as_str())
}

fn server_group_key(server_type: &ServerType) -> String {
    format!("bgtask:server_group:{}", server_type.as_str())
}

/// Registry of task metadata and its membership in per-server and
/// per-server-type index sets, backed by any [`KvStore`] implementation.
#[derive(Clone)]
pub struct TaskRegistry {
    kv: Arc<dyn KvStore>,
}

impl TaskRegistry {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Write the metadata key with TTL, then add `task_id` to both the
    /// per-server and per-server-type index sets, refreshing both sets'
    /// TTLs. Membership is idempotent — at-most-once is not required.
    pub async fn save_task(&self, metadata: &TaskMetadata) -> Result<(), RegistryError> {
        let ttl = Duration::from_secs(metadata.ttl_seconds);
        let json = metadata.to_json().map_err(|e| RegistryError::Encode(e.to_string()))?;
        self.kv.set(&task_key(metadata.task_id), &json, ttl).await?;

        let members = [metadata.task_id.to_string()];
        let server_key = server_key(&metadata.server_id);
        let group_key = server_group_key(&metadata.server_type);
        self.kv.set_add(&server_key, &members).await?;
        self.kv.expire(&server_key, ttl).await?;
        self.kv.set_add(&group_key, &members).await?;
        self.kv.expire(&group_key, ttl).await?;
        Ok(())
    }

    /// Missing value or malformed JSON both return `None` — the caller
    /// treats a malformed record as deletable, matching §4.B.
    pub async fn get_task(&self, task_id: TaskId) -> Result<Option<TaskMetadata>, RegistryError> {
        let raw = self.kv.get(&task_key(task_id)).await?;
        let Some(raw) = raw else { return Ok(None) };
        match TaskMetadata::from_json(&raw) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(err) => {
                warn!(%task_id, %err, "malformed task metadata treated as absent");
                Ok(None)
            }
        }
    }

    /// Overwrite the metadata JSON, preserving its TTL. Does not touch
    /// index sets; a server_id change after reclaim requires the caller
    /// to also `set_add` into the new owner's set (see
    /// [`Self::reassign_owner`]).
    pub async fn update_task(&self, metadata: &TaskMetadata) -> Result<(), RegistryError> {
        let ttl = Duration::from_secs(metadata.ttl_seconds);
        let json = metadata.to_json().map_err(|e| RegistryError::Encode(e.to_string()))?;
        self.kv.set(&task_key(metadata.task_id), &json, ttl).await?;
        Ok(())
    }

    /// Companion to [`Self::update_task`] for a reclaim: adds `task_id`
    /// to the new owner's set and removes it from the old owner's set.
    /// The per-server-type set is left untouched — reclaim transfers
    /// ownership within the same server type (see spec.md §4.C/P2).
    pub async fn reassign_owner(
        &self,
        task_id: TaskId,
        old_owner: &ServerId,
        new_owner: &ServerId,
        ttl: Duration,
    ) -> Result<(), RegistryError> {
        let members = [task_id.to_string()];
        let new_key = server_key(new_owner);
        self.kv.set_add(&new_key, &members).await?;
        self.kv.expire(&new_key, ttl).await?;
        self.kv.set_remove(&server_key(old_owner), &members).await?;
        Ok(())
    }

    /// Fetches metadata to learn its server_type/server_id, removes the
    /// task from both index sets, then deletes the metadata key. Order
    /// tolerates crashes between steps: an orphan set entry is harmless
    /// because recovery revalidates metadata before acting.
    pub async fn delete_task(&self, task_id: TaskId) -> Result<(), RegistryError> {
        if let Some(metadata) = self.get_task(task_id).await? {
            let members = [task_id.to_string()];
            self.kv
                .set_remove(&server_key(&metadata.server_id), &members)
                .await?;
            self.kv
                .set_remove(&server_group_key(&metadata.server_type), &members)
                .await?;
        }
        self.kv.delete(&[task_key(task_id)]).await?;
        Ok(())
    }

    /// Absent set returns the empty set.
    pub async fn get_server_tasks(&self, server_id: &ServerId) -> Result<BTreeSet<TaskId>, RegistryError> {
        self.parse_task_ids(&server_key(server_id)).await
    }

    /// Absent set returns the empty set.
    pub async fn get_server_type_tasks(
        &self,
        server_type: &ServerType,
    ) -> Result<BTreeSet<TaskId>, RegistryError> {
        self.parse_task_ids(&server_group_key(server_type)).await
    }

    async fn parse_task_ids(&self, key: &str) -> Result<BTreeSet<TaskId>, RegistryError> {
        let raw = self.kv.set_members(key).await?;
        Ok(raw
            .into_iter()
            .filter_map(|s| match s.parse() {
                Ok(id) => Some(id),
                Err(err) => {
                    warn!(member = %s, %err, "dropping malformed task id from index set");
                    None
                }
            })
            .collect())
    }

    /// Reads metadata, sets `updated_at` to now, rewrites with a fresh
    /// TTL. If metadata is absent, logs and skips.
    pub async fn update_heartbeat(&self, task_id: TaskId) -> Result<(), RegistryError> {
        let Some(metadata) = self.get_task(task_id).await? else {
            warn!(%task_id, "heartbeat skipped: metadata absent");
            return Ok(());
        };
        let refreshed = metadata.with_heartbeat(Utc::now());
        self.update_task(&refreshed).await
    }

    /// Mapping of task_id → last `updated_at`, derived from metadata;
    /// absent entries are omitted.
    pub async fn get_heartbeats(
        &self,
        task_ids: &[TaskId],
    ) -> Result<Vec<(TaskId, chrono::DateTime<Utc>)>, RegistryError> {
        let keys: Vec<String> = task_ids.iter().map(|id| task_key(*id)).collect();
        let raw = self.kv.mget(&keys).await?;
        let mut out = Vec::with_capacity(task_ids.len());
        for (task_id, value) in task_ids.iter().zip(raw) {
            if let Some(value) = value {
                if let Ok(metadata) = TaskMetadata::from_json(&value) {
                    out.push((*task_id, metadata.updated_at));
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgtask_kv::MemoryKvStore;
    use bgtask_types::TaskName;
    use std::str::FromStr;

    fn sample(server_id: &str, server_type: &str, retry_count: u32) -> TaskMetadata {
        let mut m = TaskMetadata::new(
            TaskId::from_str("00000000-0000-0000-0000-000000000001").unwrap(),
            TaskName::CloneVfolder,
            serde_json::json!({"src": "a", "dst": "b"})
                .as_object()
                .unwrap()
                .clone(),
            ServerId::new(server_id),
            ServerType::new(server_type),
            BTreeSet::new(),
            3,
            86_400,
            Utc::now(),
        );
        m.retry_count = retry_count;
        m
    }

    fn registry() -> TaskRegistry {
        TaskRegistry::new(Arc::new(MemoryKvStore::new_isolated()))
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let reg = registry();
        let m = sample("S1", "manager", 0);
        reg.save_task(&m).await.unwrap();
        let back = reg.get_task(m.task_id).await.unwrap().unwrap();
        assert_eq!(back, m);
    }

    #[tokio::test]
    async fn save_task_populates_both_index_sets() {
        let reg = registry();
        let m = sample("S1", "manager", 0);
        reg.save_task(&m).await.unwrap();
        assert!(reg
            .get_server_tasks(&ServerId::new("S1"))
            .await
            .unwrap()
            .contains(&m.task_id));
        assert!(reg
            .get_server_type_tasks(&ServerType::new("manager"))
            .await
            .unwrap()
            .contains(&m.task_id));
    }

    #[tokio::test]
    async fn delete_task_removes_from_both_index_sets() {
        let reg = registry();
        let m = sample("S1", "manager", 0);
        reg.save_task(&m).await.unwrap();
        reg.delete_task(m.task_id).await.unwrap();
        assert!(!reg
            .get_server_tasks(&ServerId::new("S1"))
            .await
            .unwrap()
            .contains(&m.task_id));
        assert!(!reg
            .get_server_type_tasks(&ServerType::new("manager"))
            .await
            .unwrap()
            .contains(&m.task_id));
        assert!(reg.get_task(m.task_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_task_twice_is_idempotent() {
        let reg = registry();
        let m = sample("S1", "manager", 0);
        reg.save_task(&m).await.unwrap();
        reg.delete_task(m.task_id).await.unwrap();
        reg.delete_task(m.task_id).await.unwrap();
    }

    #[tokio::test]
    async fn reassign_owner_moves_set_membership() {
        let reg = registry();
        let m = sample("S_dead", "manager", 0);
        reg.save_task(&m).await.unwrap();
        reg.reassign_owner(
            m.task_id,
            &ServerId::new("S_dead"),
            &ServerId::new("S2"),
            Duration::from_secs(86_400),
        )
        .await
        .unwrap();
        assert!(reg
            .get_server_tasks(&ServerId::new("S2"))
            .await
            .unwrap()
            .contains(&m.task_id));
        assert!(!reg
            .get_server_tasks(&ServerId::new("S_dead"))
            .await
            .unwrap()
            .contains(&m.task_id));
        assert!(reg
            .get_server_type_tasks(&ServerType::new("manager"))
            .await
            .unwrap()
            .contains(&m.task_id));
    }

    #[tokio::test]
    async fn update_heartbeat_advances_updated_at() {
        let reg = registry();
        let m = sample("S1", "manager", 0);
        reg.save_task(&m).await.unwrap();
        reg.update_heartbeat(m.task_id).await.unwrap();
        let refreshed = reg.get_task(m.task_id).await.unwrap().unwrap();
        assert!(refreshed.updated_at >= m.updated_at);
    }

    #[tokio::test]
    async fn update_heartbeat_on_absent_task_is_a_no_op() {
        let reg = registry();
        let id = TaskId::from_str("00000000-0000-0000-0000-000000000099").unwrap();
        reg.update_heartbeat(id).await.unwrap();
    }

    #[tokio::test]
    async fn get_heartbeats_omits_absent_task_ids() {
        let reg = registry();
        let m = sample("S1", "manager", 0);
        reg.save_task(&m).await.unwrap();
        let absent = TaskId::from_str("00000000-0000-0000-0000-000000000099").unwrap();
        let heartbeats = reg.get_heartbeats(&[m.task_id, absent]).await.unwrap();
        assert_eq!(heartbeats.len(), 1);
        assert_eq!(heartbeats[0].0, m.task_id);
    }
}
