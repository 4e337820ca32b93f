use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::defs::{DEFAULT_MAX_RETRIES, DEFAULT_TTL_SECONDS};
use crate::ids::{ServerId, ServerType, TaskId};
use crate::task_name::TaskName;

/// Serializable task descriptor, persisted as a JSON string under
/// `bgtask:task:{task_id}` (see spec.md §4.B/§6).
///
/// Modeled as an immutable value per the re-architecture note in
/// spec.md §9: the source mutates `retry_count`/`server_id` in place on
/// reclaim, but here a reclaim produces a new `TaskMetadata` via
/// [`TaskMetadata::for_reclaim`] that the caller writes back through
/// the registry. Nothing exposes `&mut` access to the fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskMetadata {
    pub task_id: TaskId,
    pub task_name: TaskName,
    pub body: serde_json::Map<String, Value>,
    pub server_id: ServerId,
    pub server_type: ServerType,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_ttl_seconds() -> u64 {
    DEFAULT_TTL_SECONDS
}

impl TaskMetadata {
    /// Build a freshly-submitted task's metadata: `retry_count` starts
    /// at zero, `created_at`/`updated_at` are both `now`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: TaskId,
        task_name: TaskName,
        body: serde_json::Map<String, Value>,
        server_id: ServerId,
        server_type: ServerType,
        tags: BTreeSet<String>,
        max_retries: u32,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            task_name,
            body,
            server_id,
            server_type,
            tags,
            retry_count: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            ttl_seconds,
        }
    }

    /// True once `retry_count` has reached `max_retries`: the next
    /// staleness detection must fail the task rather than reclaim it.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Produce the post-image of a reclaim: `retry_count + 1`, ownership
    /// transferred to `new_owner`, `updated_at` reset to `now`. Per
    /// P3, the caller must not call this once `retries_exhausted()`.
    pub fn for_reclaim(&self, new_owner: ServerId, now: DateTime<Utc>) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            server_id: new_owner,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Produce the post-image of a heartbeat refresh: only `updated_at`
    /// changes.
    pub fn with_heartbeat(&self, now: DateTime<Utc>) -> Self {
        Self {
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
