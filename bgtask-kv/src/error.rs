use thiserror::Error;

/// Transport-level failure from the KV backend. Callers in
/// `bgtask-registry` map this onto `BgtaskError::TransientKvFailure`
/// per spec.md §7 — heartbeat writes and recovery reads retry on the
/// next tick rather than propagating immediately.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv backend unavailable: {0}")]
    Unavailable(String),

    #[error("kv value could not be decoded: {0}")]
    Decode(String),
}

impl From<redis::RedisError> for KvError {
    fn from(e: redis::RedisError) -> Self {
        KvError::Unavailable(e.to_string())
    }
}
