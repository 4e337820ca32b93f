//! Name → handler dispatch with typed arguments (spec.md §4.F),
//! grounded on `original_source/.../bgtask/task/{base,registry}.py`
//! translated into `serde(deny_unknown_fields)` strict-schema idioms.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bgtask_types::{BgtaskError, HandlerError, TaskName};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Base contract every task body implements. `Args` should derive
/// `Deserialize` with `#[serde(deny_unknown_fields)]` — the Rust
/// equivalent of the source's Pydantic `ConfigDict(extra="forbid",
/// frozen=True)` — so `revive_task` rejects corrupt persisted bodies
/// instead of silently ignoring unknown keys. `cancel` is the
/// first-class cancellation signal named in spec.md §9: handlers should
/// poll `cancel.is_cancelled()` at their own suspension points.
#[async_trait]
pub trait BackgroundTaskHandler: Send + Sync {
    type Args: DeserializeOwned + Serialize + Send + Sync + 'static;

    fn name(&self) -> TaskName;

    async fn execute(
        &self,
        args: Self::Args,
        cancel: CancellationToken,
    ) -> Result<Value, HandlerError>;
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    fn name(&self) -> TaskName;

    /// Deserializes `args` strictly against this handler's `Args` type,
    /// then executes. The caller chooses how a deserialize failure is
    /// classified (see [`HandlerRegistry::execute_new_task`] vs
    /// [`HandlerRegistry::revive_task`]).
    async fn execute_value(
        &self,
        args: Value,
        cancel: CancellationToken,
    ) -> Result<Value, DispatchError>;
}

enum DispatchError {
    InvalidArgs(serde_json::Error),
    Handler(HandlerError),
}

#[async_trait]
impl<H: BackgroundTaskHandler> ErasedHandler for H {
    fn name(&self) -> TaskName {
        BackgroundTaskHandler::name(self)
    }

    async fn execute_value(
        &self,
        args: Value,
        cancel: CancellationToken,
    ) -> Result<Value, DispatchError> {
        let typed: H::Args = serde_json::from_value(args).map_err(DispatchError::InvalidArgs)?;
        self.execute(typed, cancel)
            .await
            .map_err(DispatchError::Handler)
    }
}

/// Stores one handler per [`TaskName`]; dispatches via
/// [`execute_new_task`](Self::execute_new_task) (args already trusted,
/// built by the submitting caller) or
/// [`revive_task`](Self::revive_task) (args read back from persisted
/// metadata, validated strictly).
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskName, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<H: BackgroundTaskHandler + 'static>(&mut self, handler: H) {
        let name = BackgroundTaskHandler::name(&handler);
        self.handlers.insert(name, Arc::new(handler));
    }

    fn resolve(&self, name: TaskName) -> Result<Arc<dyn ErasedHandler>, BgtaskError> {
        self.handlers
            .get(&name)
            .cloned()
            .ok_or(BgtaskError::BgtaskNotRegistered(name))
    }

    pub fn is_registered(&self, name: TaskName) -> bool {
        self.handlers.contains_key(&name)
    }

    /// `args` was already constructed as a typed value by the submitting
    /// caller (the out-of-scope API layer); a deserialize failure here
    /// indicates that caller passed a value that doesn't match the
    /// handler's own `Args` type and is wrapped as a `HandlerFailure`
    /// rather than `InvalidTaskMetadata`, which is reserved for corrupt
    /// *persisted* records (see [`Self::revive_task`]).
    pub async fn execute_new_task(
        &self,
        name: TaskName,
        args: Value,
        cancel: CancellationToken,
    ) -> Result<Value, BgtaskError> {
        let handler = self.resolve(name)?;
        handler
            .execute_value(args, cancel)
            .await
            .map_err(|e| match e {
                DispatchError::InvalidArgs(err) => {
                    BgtaskError::HandlerFailure(HandlerError::new(format!(
                        "submitted args do not match handler schema: {err}"
                    )))
                }
                DispatchError::Handler(err) => BgtaskError::HandlerFailure(err),
            })
    }

    /// `body` is the raw mapping read back from a persisted
    /// `TaskMetadata`. Validated strictly (forbid extra keys) against
    /// the handler's `Args` schema; a mismatch raises
    /// `InvalidTaskMetadata` per spec.md §4.F.
    pub async fn revive_task(
        &self,
        name: TaskName,
        body: Value,
        cancel: CancellationToken,
    ) -> Result<Value, BgtaskError> {
        let handler = self.resolve(name)?;
        handler
            .execute_value(body, cancel)
            .await
            .map_err(|e| match e {
                DispatchError::InvalidArgs(err) => {
                    BgtaskError::InvalidTaskMetadata(format!("body does not match schema: {err}"))
                }
                DispatchError::Handler(err) => BgtaskError::HandlerFailure(err),
            })
    }
}
