use std::fmt;

use thiserror::Error;

use crate::task_name::TaskName;

/// Error domain component of an `ErrorCode`. This subsystem only ever
/// produces `Bgtask`; the type stays open for handler-specific domains
/// surfaced through `HandlerError::code`.
///
/// Not serialized: no wire schema in spec.md §6 carries an `ErrorCode`
/// directly, only its `Display` rendering in log/metric labels and
/// human-readable messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    Bgtask,
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDomain::Bgtask => write!(f, "BGTASK"),
        }
    }
}

/// Error operation component of an `ErrorCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorOperation {
    Execute,
}

impl fmt::Display for ErrorOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorOperation::Execute => write!(f, "EXECUTE"),
        }
    }
}

/// Error detail component of an `ErrorCode`. `Handler` carries a
/// handler-defined detail string for domain errors that don't fit the
/// two built-in details.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorDetail {
    Canceled,
    InternalError,
    Handler(String),
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetail::Canceled => write!(f, "CANCELED"),
            ErrorDetail::InternalError => write!(f, "INTERNAL_ERROR"),
            ErrorDetail::Handler(detail) => write!(f, "{detail}"),
        }
    }
}

/// A `(domain, operation, detail)` triple identifying an error class,
/// per spec.md §6/§7. `Display` renders it `DOMAIN/OPERATION/DETAIL`,
/// matching the scenario S2's `BGTASK/EXECUTE/INTERNAL_ERROR`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    pub domain: ErrorDomain,
    pub operation: ErrorOperation,
    pub detail: ErrorDetail,
}

impl ErrorCode {
    pub fn new(domain: ErrorDomain, operation: ErrorOperation, detail: ErrorDetail) -> Self {
        Self {
            domain,
            operation,
            detail,
        }
    }

    /// `(BGTASK, EXECUTE, CANCELED)` — the code for a cancelled task.
    pub fn cancelled() -> Self {
        Self::new(ErrorDomain::Bgtask, ErrorOperation::Execute, ErrorDetail::Canceled)
    }

    /// `(BGTASK, EXECUTE, INTERNAL_ERROR)` — the generic fallback for an
    /// unstructured handler failure.
    pub fn internal_error() -> Self {
        Self::new(
            ErrorDomain::Bgtask,
            ErrorOperation::Execute,
            ErrorDetail::InternalError,
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.operation, self.detail)
    }
}

/// The error a handler's `execute` returns. Carries an optional domain
/// error code; handlers that know their own failure mode set `code`,
/// everything else falls back to `ErrorCode::internal_error()` at the
/// `TaskResult` projection boundary (see `bgtask-types::TaskResult`'s
/// counterpart in `bgtask-hooks`/`bgtask-runner`).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub code: Option<ErrorCode>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

/// The error taxonomy of the background-task subsystem, per spec.md §7.
#[derive(Debug, Error)]
pub enum BgtaskError {
    #[error("invalid task metadata: {0}")]
    InvalidTaskMetadata(String),

    #[error("no handler registered for task name {0}")]
    BgtaskNotRegistered(TaskName),

    #[error("handler failed: {0}")]
    HandlerFailure(#[from] HandlerError),

    #[error("task cancelled: {0}")]
    Cancelled(String),

    #[error("transient kv failure: {0}")]
    TransientKvFailure(String),

    #[error("unreachable state: {0}")]
    UnreachableState(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_displays_as_slash_separated_triple() {
        assert_eq!(ErrorCode::internal_error().to_string(), "BGTASK/EXECUTE/INTERNAL_ERROR");
        assert_eq!(ErrorCode::cancelled().to_string(), "BGTASK/EXECUTE/CANCELED");
    }
}
