use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a task as observed by hooks and subscribers.
///
/// `Unknown` is not reachable from a `TaskResult` projection; it exists
/// only for the metric hook's fallback when a hook's post-phase runs
/// without a populated `context.result` (a bug in a handler that never
/// returns, not a reachable task lifecycle state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Started,
    Updated,
    Done,
    Cancelled,
    Failed,
    PartialSuccess,
    Unknown,
}

impl Status {
    /// True for every terminal status except `Started`/`Updated`.
    /// `Unknown` counts as finished: it only ever arises after a runner
    /// has already exited without reporting a proper result.
    pub fn finished(&self) -> bool {
        !matches!(self, Status::Started | Status::Updated)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Started => "started",
            Status::Updated => "updated",
            Status::Done => "done",
            Status::Cancelled => "cancelled",
            Status::Failed => "failed",
            Status::PartialSuccess => "partial_success",
            Status::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}
