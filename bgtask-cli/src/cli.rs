use clap::Parser;
use serde::{Deserialize, Serialize};

fn default_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_staleness_secs() -> u64 {
    1_800
}

fn default_recovery_interval_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Command-line entry point for one cluster node running the
/// background-task subsystem: a submitter surface, a Task Runner, and
/// a Recovery Loop, all sharing one registry.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Parser)]
#[command(name = "bgtaskd", about = "Background task execution and recovery node", long_about = None)]
#[serde(default)]
pub struct Cli {
    /// This node's server id, unique across the cluster.
    #[arg(long, env = "BGTASK_SERVER_ID")]
    pub server_id: String,

    /// This node's server type (the pool it shares reclaim duties with).
    #[arg(long, env = "BGTASK_SERVER_TYPE")]
    pub server_type: String,

    /// `redis://host:port` of the shared key-value store. Omit to run
    /// against an in-process store (single-node development only).
    #[arg(long, env = "BGTASK_REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, default_value = "30")]
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    #[arg(long, default_value = "1800")]
    #[serde(default = "default_staleness_secs")]
    pub staleness_threshold_secs: u64,

    #[arg(long, default_value = "60")]
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,

    #[arg(long, default_value = "3")]
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    #[arg(long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for the rotating JSON task-event log. Stdout logging
    /// always runs regardless of this setting.
    #[arg(long)]
    pub log_path: Option<std::path::PathBuf>,

    #[arg(long, default_value = "0.0.0.0:9090")]
    #[serde(default = "default_address")]
    pub metrics_address: String,
}
