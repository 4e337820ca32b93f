//! Prometheus counters and histograms for task execution (spec.md
//! §4.E's metric-observer hook), grounded on the teacher's
//! `lazy_static!` + `register_*_vec!` idiom.

use std::time::Duration;

use bgtask_types::{ErrorCode, Status, TaskName};
use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_histogram_vec, CounterVec, HistogramVec};

mod traits;

pub use traits::ToLabel;

lazy_static! {
    pub static ref BGTASK_START_COUNT: CounterVec = register_counter_vec!(
        "bgtask_start_count",
        "the number of background tasks started",
        &["task_name"]
    )
    .unwrap();

    pub static ref BGTASK_DONE_COUNT: CounterVec = register_counter_vec!(
        "bgtask_done_count",
        "the number of background tasks that reached a terminal state",
        &["task_name", "status", "error_code"]
    )
    .unwrap();

    pub static ref BGTASK_EXECUTION_DURATION_MILLIS: HistogramVec = register_histogram_vec!(
        "bgtask_execution_duration_millis",
        "the duration of a background task run from start to terminal state",
        &["task_name", "status"]
    )
    .unwrap();

    pub static ref BGTASK_RECLAIM_COUNT: CounterVec = register_counter_vec!(
        "bgtask_reclaim_count",
        "the number of times a stale background task was reclaimed by the recovery loop",
        &["task_name"]
    )
    .unwrap();
}

pub fn inc_start_count(task_name: TaskName) {
    BGTASK_START_COUNT
        .with_label_values(&[&task_name.to_label()])
        .inc();
}

pub fn inc_done_count(task_name: TaskName, status: Status, error_code: Option<ErrorCode>) {
    BGTASK_DONE_COUNT
        .with_label_values(&[
            &task_name.to_label(),
            &status.to_label(),
            &error_code.to_label(),
        ])
        .inc();
}

pub fn observe_execution_duration(task_name: TaskName, status: Status, duration: Duration) {
    BGTASK_EXECUTION_DURATION_MILLIS
        .with_label_values(&[&task_name.to_label(), &status.to_label()])
        .observe(duration.as_millis() as f64);
}

pub fn inc_reclaim_count(task_name: TaskName) {
    BGTASK_RECLAIM_COUNT
        .with_label_values(&[&task_name.to_label()])
        .inc();
}

/// Consumed by the Hook Pipeline's metric-observer hook (spec.md
/// §4.E.1). A trait, rather than calling the free functions directly,
/// so the hook can be unit-tested against a fake observer.
pub trait TaskMetricsObserver: Send + Sync {
    fn on_start(&self, task_name: TaskName);
    fn on_finish(
        &self,
        task_name: TaskName,
        status: Status,
        error_code: Option<ErrorCode>,
        duration: Duration,
    );
    fn on_reclaim(&self, task_name: TaskName);
}

/// Default [`TaskMetricsObserver`] recording to the process-global
/// Prometheus registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusTaskObserver;

impl TaskMetricsObserver for PrometheusTaskObserver {
    fn on_start(&self, task_name: TaskName) {
        inc_start_count(task_name);
    }

    fn on_finish(
        &self,
        task_name: TaskName,
        status: Status,
        error_code: Option<ErrorCode>,
        duration: Duration,
    ) {
        inc_done_count(task_name, status, error_code);
        observe_execution_duration(task_name, status, duration);
    }

    fn on_reclaim(&self, task_name: TaskName) {
        inc_reclaim_count(task_name);
    }
}
