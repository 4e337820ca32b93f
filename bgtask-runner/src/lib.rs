//! The Task Runner (spec.md §4.G) and Recovery Loop (spec.md §4.H):
//! claims a task id, runs it inside the Hook Pipeline, and reclaims
//! stale tasks from crashed owners.

mod heartbeat;
mod recovery;
mod runner;

pub use recovery::{should_retry, OngoingTasks, RecoveryLoop};
pub use runner::TaskRunner;
