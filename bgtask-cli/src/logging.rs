use std::fs::{create_dir_all, File};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Installs a stdout subscriber filtered by `log_level`, and, if
/// `log_path` is set, a rotating-by-month JSON layer for task events
/// (mirrors the teacher's billing log, repurposed here for task
/// lifecycle events rather than proof billing).
pub fn subscribe_log(log_path: &Option<PathBuf>, log_level: &str) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_filter(env_filter);

    let Some(dir) = log_path else {
        tracing_subscriber::registry().with(stdout_layer).init();
        return None;
    };

    if let Err(err) = create_dir_all(dir) {
        eprintln!("failed to create log dir {}: {err}", dir.display());
        tracing_subscriber::registry().with(stdout_layer).init();
        return None;
    }

    let filename = format!("bgtask-{}.log", Utc::now().format("%Y-%m"));
    let file_path: &Path = dir.as_path();
    let file = match File::create(file_path.join(&filename)) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("failed to create log file {filename}: {err}");
            tracing_subscriber::registry().with(stdout_layer).init();
            return None;
        }
    };
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(EnvFilter::new("bgtask=debug"));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Some(guard)
}
