//! Concrete task bodies. Interface-only stand-ins: the domain logic
//! behind each one (storage clone/delete, registry push) is explicitly
//! out of scope, so each handler validates its arguments and returns
//! them back as its result.

use async_trait::async_trait;
use bgtask_handlers::BackgroundTaskHandler;
use bgtask_types::{HandlerError, TaskName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CloneVfolderArgs {
    pub source_vfolder_id: String,
    pub target_vfolder_id: String,
}

pub struct CloneVfolderHandler;

#[async_trait]
impl BackgroundTaskHandler for CloneVfolderHandler {
    type Args = CloneVfolderArgs;

    fn name(&self) -> TaskName {
        TaskName::CloneVfolder
    }

    async fn execute(
        &self,
        args: Self::Args,
        _cancel: CancellationToken,
    ) -> Result<Value, HandlerError> {
        Ok(serde_json::json!({
            "source_vfolder_id": args.source_vfolder_id,
            "target_vfolder_id": args.target_vfolder_id,
        }))
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteVfolderArgs {
    pub vfolder_id: String,
}

pub struct DeleteVfolderHandler;

#[async_trait]
impl BackgroundTaskHandler for DeleteVfolderHandler {
    type Args = DeleteVfolderArgs;

    fn name(&self) -> TaskName {
        TaskName::DeleteVfolder
    }

    async fn execute(
        &self,
        args: Self::Args,
        _cancel: CancellationToken,
    ) -> Result<Value, HandlerError> {
        Ok(serde_json::json!({ "vfolder_id": args.vfolder_id }))
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PushImageArgs {
    pub image_ref: String,
    pub registry: String,
}

pub struct PushImageHandler;

#[async_trait]
impl BackgroundTaskHandler for PushImageHandler {
    type Args = PushImageArgs;

    fn name(&self) -> TaskName {
        TaskName::PushImage
    }

    async fn execute(
        &self,
        args: Self::Args,
        _cancel: CancellationToken,
    ) -> Result<Value, HandlerError> {
        Ok(serde_json::json!({
            "image_ref": args.image_ref,
            "registry": args.registry,
        }))
    }
}

pub fn default_handlers() -> bgtask_handlers::HandlerRegistry {
    let mut registry = bgtask_handlers::HandlerRegistry::new();
    registry.register(CloneVfolderHandler);
    registry.register(DeleteVfolderHandler);
    registry.register(PushImageHandler);
    registry
}
