//! Terminal/progress event projections broadcast to subscribers
//! (spec.md §6), plus the broadcast-with-cache bus hooks publish
//! through.

use std::sync::Mutex;
use std::time::Duration;

use bgtask_types::{Status, TaskId, TaskResult};
use lru_time_cache::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// An event produced while running or concluding a background task.
///
/// `AlreadyDone` is synthesized in-process for a subscriber that queries
/// a task after it already reached a terminal state (spec.md §6/§7); it
/// is never published on the broadcast channel and has no `WireEvent`
/// counterpart, so it is structurally impossible to serialize or
/// deserialize for transport. Attempting to do so through
/// [`BgtaskEvent::to_wire`] is a programmer error and panics, matching
/// the source's `UnreachableError`.
#[derive(Debug, Clone, PartialEq)]
pub enum BgtaskEvent {
    Updated {
        task_id: TaskId,
        current: u64,
        total: u64,
        message: Option<String>,
    },
    Done {
        task_id: TaskId,
        message: Option<String>,
    },
    Cancelled {
        task_id: TaskId,
        message: Option<String>,
    },
    Failed {
        task_id: TaskId,
        message: Option<String>,
    },
    PartialSuccess {
        task_id: TaskId,
        message: Option<String>,
        errors: Vec<String>,
    },
    AlreadyDone {
        task_id: TaskId,
        task_status: Status,
        message: Option<String>,
    },
}

impl BgtaskEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            BgtaskEvent::Updated { .. } => "bgtask_updated",
            BgtaskEvent::Done { .. } => "bgtask_done",
            BgtaskEvent::Cancelled { .. } => "bgtask_cancelled",
            BgtaskEvent::Failed { .. } => "bgtask_failed",
            BgtaskEvent::PartialSuccess { .. } => "bgtask_partial_success",
            BgtaskEvent::AlreadyDone { .. } => "bgtask_already_done",
        }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            BgtaskEvent::Updated { task_id, .. }
            | BgtaskEvent::Done { task_id, .. }
            | BgtaskEvent::Cancelled { task_id, .. }
            | BgtaskEvent::Failed { task_id, .. }
            | BgtaskEvent::PartialSuccess { task_id, .. }
            | BgtaskEvent::AlreadyDone { task_id, .. } => *task_id,
        }
    }

    /// Status projection. `PartialSuccess` currently projects to `Done`
    /// per the Open Question in spec.md §9 (preserved from the source's
    /// own `# TODO: When client side is ready, we can change this to
    /// TaskStatus.PARTIAL_SUCCESS`) — the variant itself stays distinct,
    /// this projection is a policy knob callers may revisit.
    pub fn status(&self) -> Status {
        match self {
            BgtaskEvent::Updated { .. } => Status::Updated,
            BgtaskEvent::Done { .. } => Status::Done,
            BgtaskEvent::Cancelled { .. } => Status::Cancelled,
            BgtaskEvent::Failed { .. } => Status::Failed,
            BgtaskEvent::PartialSuccess { .. } => Status::Done,
            BgtaskEvent::AlreadyDone { task_status, .. } => *task_status,
        }
    }

    /// A terminal-status projection suitable for caching, used to
    /// synthesize `AlreadyDone` for late subscribers. `None` for
    /// `Updated` (non-terminal) and for `AlreadyDone` itself (it is
    /// never re-cached).
    fn terminal_projection(&self) -> Option<(Status, Option<String>)> {
        match self {
            BgtaskEvent::Updated { .. } | BgtaskEvent::AlreadyDone { .. } => None,
            BgtaskEvent::Done { message, .. } => Some((Status::Done, message.clone())),
            BgtaskEvent::Cancelled { message, .. } => Some((Status::Cancelled, message.clone())),
            BgtaskEvent::Failed { message, .. } => Some((Status::Failed, message.clone())),
            BgtaskEvent::PartialSuccess { message, .. } => {
                Some((Status::PartialSuccess, message.clone()))
            }
        }
    }

    /// Convert to the wire representation broadcast to transport
    /// subscribers. Panics on `AlreadyDone`.
    pub fn to_wire(&self) -> WireEvent {
        match self {
            BgtaskEvent::Updated {
                task_id,
                current,
                total,
                message,
            } => WireEvent::Updated {
                task_id: *task_id,
                current: *current,
                total: *total,
                message: message.clone(),
            },
            BgtaskEvent::Done { task_id, message } => WireEvent::Done {
                task_id: *task_id,
                message: message.clone(),
            },
            BgtaskEvent::Cancelled { task_id, message } => WireEvent::Cancelled {
                task_id: *task_id,
                message: message.clone(),
            },
            BgtaskEvent::Failed { task_id, message } => WireEvent::Failed {
                task_id: *task_id,
                message: message.clone(),
            },
            BgtaskEvent::PartialSuccess {
                task_id,
                message,
                errors,
            } => WireEvent::PartialSuccess {
                task_id: *task_id,
                message: message.clone(),
                errors: errors.clone(),
            },
            BgtaskEvent::AlreadyDone { .. } => {
                unreachable!("bgtask_already_done must never be serialized for transport")
            }
        }
    }

    pub fn from_wire(wire: WireEvent) -> Self {
        match wire {
            WireEvent::Updated {
                task_id,
                current,
                total,
                message,
            } => BgtaskEvent::Updated {
                task_id,
                current,
                total,
                message,
            },
            WireEvent::Done { task_id, message } => BgtaskEvent::Done { task_id, message },
            WireEvent::Cancelled { task_id, message } => {
                BgtaskEvent::Cancelled { task_id, message }
            }
            WireEvent::Failed { task_id, message } => BgtaskEvent::Failed { task_id, message },
            WireEvent::PartialSuccess {
                task_id,
                message,
                errors,
            } => BgtaskEvent::PartialSuccess {
                task_id,
                message,
                errors,
            },
        }
    }
}

/// Projects a Task Runner's [`TaskResult`] to the terminal
/// [`BgtaskEvent`] broadcast when a task concludes (spec.md §4.D/§6).
/// Kept as a free function here, rather than a method on `TaskResult`
/// itself, so `bgtask-types` does not need to depend on `bgtask-events`
/// (which already depends on `bgtask-types`).
pub fn terminal_event_for(task_id: TaskId, result: &TaskResult) -> BgtaskEvent {
    match result {
        TaskResult::Success(value) => BgtaskEvent::Done {
            task_id,
            message: Some(value.to_string()),
        },
        TaskResult::Cancelled(message) => BgtaskEvent::Cancelled {
            task_id,
            message: Some(message.clone()),
        },
        TaskResult::Failed(err) => BgtaskEvent::Failed {
            task_id,
            message: Some(err.message.clone()),
        },
    }
}

/// The transport-serializable subset of [`BgtaskEvent`]. Has no
/// `AlreadyDone` variant, so a value produced in-process for a late
/// subscriber cannot be accidentally handed to a serializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum WireEvent {
    #[serde(rename = "bgtask_updated")]
    Updated {
        task_id: TaskId,
        current: u64,
        total: u64,
        message: Option<String>,
    },
    #[serde(rename = "bgtask_done")]
    Done {
        task_id: TaskId,
        message: Option<String>,
    },
    #[serde(rename = "bgtask_cancelled")]
    Cancelled {
        task_id: TaskId,
        message: Option<String>,
    },
    #[serde(rename = "bgtask_failed")]
    Failed {
        task_id: TaskId,
        message: Option<String>,
    },
    #[serde(rename = "bgtask_partial_success")]
    PartialSuccess {
        task_id: TaskId,
        message: Option<String>,
        errors: Vec<String>,
    },
}

/// Publishes events onto a broadcast channel. Implemented by
/// [`BgtaskEventBus`]; a trait so hooks can be unit-tested against a
/// fake.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: BgtaskEvent);
}

const DEFAULT_BROADCAST_CAPACITY: usize = 1024;
const DEFAULT_TERMINAL_CACHE_CAPACITY: usize = 4096;

/// Broadcast channel plus a short-lived terminal-status cache, so a
/// subscriber attaching after a task has already finished still gets a
/// synthesized `AlreadyDone` answer instead of silence. Grounded on the
/// source's `EventCacheDomain.BGTASK.cache_id` idea, using the
/// `lru_time_cache` crate already in the teacher's dependency graph
/// (`reqactor/Cargo.toml`) in place of the source's bespoke cache.
pub struct BgtaskEventBus {
    sender: broadcast::Sender<BgtaskEvent>,
    terminal_cache: Mutex<LruCache<TaskId, (Status, Option<String>)>>,
}

impl BgtaskEventBus {
    pub fn new(terminal_cache_ttl: Duration) -> Self {
        Self::with_capacity(
            DEFAULT_BROADCAST_CAPACITY,
            DEFAULT_TERMINAL_CACHE_CAPACITY,
            terminal_cache_ttl,
        )
    }

    pub fn with_capacity(
        broadcast_capacity: usize,
        terminal_cache_capacity: usize,
        terminal_cache_ttl: Duration,
    ) -> Self {
        let (sender, _) = broadcast::channel(broadcast_capacity);
        Self {
            sender,
            terminal_cache: Mutex::new(LruCache::with_expiry_duration_and_capacity(
                terminal_cache_ttl,
                terminal_cache_capacity,
            )),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BgtaskEvent> {
        self.sender.subscribe()
    }

    /// Produces `AlreadyDone` for `task_id` if it reached a terminal
    /// status within the cache's TTL, `None` otherwise (unknown or
    /// evicted).
    pub fn query_already_done(&self, task_id: TaskId) -> Option<BgtaskEvent> {
        let mut cache = self.terminal_cache.lock().unwrap();
        cache
            .get(&task_id)
            .map(|(task_status, message)| BgtaskEvent::AlreadyDone {
                task_id,
                task_status: *task_status,
                message: message.clone(),
            })
    }
}

impl EventPublisher for BgtaskEventBus {
    fn publish(&self, event: BgtaskEvent) {
        if let Some(projection) = event.terminal_projection() {
            self.terminal_cache
                .lock()
                .unwrap()
                .insert(event.task_id(), projection);
        }
        // No receivers is not an error: progress events may simply have
        // no live subscriber.
        let _ = self.sender.send(event);
    }
}
