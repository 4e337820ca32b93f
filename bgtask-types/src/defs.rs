//! Tunable defaults for TTLs, retry limits and loop periods.
//!
//! These are defaults only: every crate that reads them takes a config
//! value with the same default rather than hard-coding the constant
//! directly, so deployments can override them independently (see §9 of
//! SPEC_FULL.md: staleness threshold and heartbeat TTL are independent
//! tunables, not the same knob).

/// Default TTL, in seconds, for a task metadata record.
pub const DEFAULT_TTL_SECONDS: u64 = 86_400;

/// Default interval, in seconds, at which a running task's heartbeat
/// emitter refreshes `updated_at`.
pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 600;

/// Default staleness threshold, in seconds: a task whose heartbeat is
/// older than this is eligible for reclaim by the Recovery Loop.
pub const DEFAULT_HEARTBEAT_THRESHOLD: u64 = 1_800;

/// Default TTL, in seconds, for the optional dedicated heartbeat key.
pub const DEFAULT_HEARTBEAT_TTL: u64 = 3_600;

/// Default maximum number of reclaims before a task is failed outright.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default sleep interval, in seconds, between Recovery Loop sweeps.
pub const RECOVERY_CHECK_INTERVAL: u64 = 60;
