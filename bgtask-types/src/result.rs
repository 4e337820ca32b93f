use crate::error::{ErrorCode, HandlerError};
use crate::status::Status;

/// Sum type produced by a Task Runner's attempt to execute a task body,
/// per spec.md §4.D. Values come back from the Handler Registry as
/// JSON (handlers are type-erased at that boundary), so `Success`
/// carries a `serde_json::Value` rather than a generic `R` — see
/// DESIGN.md for why this collapses the source's `Generic[R]`.
#[derive(Debug, Clone)]
pub enum TaskResult {
    Success(serde_json::Value),
    Cancelled(String),
    Failed(HandlerError),
}

impl TaskResult {
    pub fn status(&self) -> Status {
        match self {
            TaskResult::Success(_) => Status::Done,
            TaskResult::Cancelled(_) => Status::Cancelled,
            TaskResult::Failed(_) => Status::Failed,
        }
    }

    /// `None` on success; a structured error code for cancellation or
    /// failure. A failure preserves the handler's own code when it
    /// provided one, else falls back to the generic internal-error code.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            TaskResult::Success(_) => None,
            TaskResult::Cancelled(_) => Some(ErrorCode::cancelled()),
            TaskResult::Failed(err) => {
                Some(err.code.clone().unwrap_or_else(ErrorCode::internal_error))
            }
        }
    }

    /// A short human-readable message for terminal-event projection.
    pub fn message(&self) -> String {
        match self {
            TaskResult::Success(value) => value.to_string(),
            TaskResult::Cancelled(message) => message.clone(),
            TaskResult::Failed(err) => err.message.clone(),
        }
    }
}
