use bgtask_kv::KvError;
use thiserror::Error;

/// Errors surfaced by [`crate::TaskRegistry`]. Malformed persisted JSON
/// is deliberately not a variant here — per spec.md §4.B/§4.C it is
/// treated as an absent record, not an error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("kv store failure: {0}")]
    Kv(#[from] KvError),

    #[error("failed to encode task metadata: {0}")]
    Encode(String),
}
