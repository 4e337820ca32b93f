mod cli;
mod handlers;
mod logging;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bgtask_events::BgtaskEventBus;
use bgtask_kv::{KvStore, MemoryKvStore, RedisKvStore, RedisKvStoreConfig};
use bgtask_registry::TaskRegistry;
use bgtask_metrics::PrometheusTaskObserver;
use bgtask_runner::{OngoingTasks, RecoveryLoop, TaskRunner};
use bgtask_types::{ServerId, ServerType};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stdout)
        .init();
    let opts = Cli::parse();
    let _guard = logging::subscribe_log(&opts.log_path, &opts.log_level);
    info!(server_id = %opts.server_id, server_type = %opts.server_type, "starting bgtaskd");

    let kv: Arc<dyn KvStore> = match &opts.redis_url {
        Some(url) => Arc::new(RedisKvStore::open(RedisKvStoreConfig {
            redis_url: url.clone(),
        })?),
        None => {
            info!("no redis url configured, running against an in-process store");
            Arc::new(MemoryKvStore::new_isolated())
        }
    };

    let registry = TaskRegistry::new(kv);
    let observer: Arc<dyn bgtask_metrics::TaskMetricsObserver> = Arc::new(PrometheusTaskObserver);
    let events: Arc<dyn bgtask_events::EventPublisher> =
        Arc::new(BgtaskEventBus::new(Duration::from_secs(opts.staleness_threshold_secs)));
    let handlers = Arc::new(handlers::default_handlers());

    let runner = Arc::new(TaskRunner::new(
        registry.clone(),
        handlers,
        observer.clone(),
        events.clone(),
        Duration::from_secs(opts.heartbeat_interval_secs),
    ));

    let ongoing: OngoingTasks = Arc::new(StdMutex::new(std::collections::HashMap::new()));
    let recovery = RecoveryLoop::new(
        ServerId::new(opts.server_id.clone()),
        ServerType::new(opts.server_type.clone()),
        registry,
        runner,
        observer,
        events,
        ongoing,
        Duration::from_secs(opts.recovery_interval_secs),
        Duration::from_secs(opts.staleness_threshold_secs),
    );

    let cancel = CancellationToken::new();
    let recovery_cancel = cancel.clone();
    let recovery_handle = tokio::spawn(async move { recovery.run(recovery_cancel).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping recovery loop");
    cancel.cancel();
    let _ = recovery_handle.await;

    Ok(())
}
