use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvError;

/// The operation set the core requires from a key-addressed store
/// supporting string values, unordered sets, and TTLs (spec.md §4.A).
/// The store is consulted from multiple managers; operations are
/// atomic per key. No multi-key transactions are required — `mset`
/// followed by per-key `expire` is accepted as non-atomic per the
/// re-architecture note in spec.md §9.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Write `value` under `key`, attaching an absolute TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// Read the value at `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Read several keys at once, preserving order; absent entries are `None`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError>;

    /// Delete `keys`. Idempotent: deleting an absent key is not an error.
    async fn delete(&self, keys: &[String]) -> Result<(), KvError>;

    /// Add `members` to the unordered set at `key`. Idempotent; a no-op
    /// if `members` is empty.
    async fn set_add(&self, key: &str, members: &[String]) -> Result<(), KvError>;

    /// Remove `members` from the unordered set at `key`. Idempotent; a
    /// no-op if `members` is empty or the members aren't present.
    async fn set_remove(&self, key: &str, members: &[String]) -> Result<(), KvError>;

    /// Members of the set at `key`, or the empty set if absent.
    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, KvError>;

    /// Refresh the TTL on an existing key. A no-op if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError>;

    /// Bulk write of `(key, value)` pairs with no TTL attached; the
    /// caller follows up with per-key `expire` calls (see spec.md §9:
    /// this mirrors the source's non-atomic `mset` + `expire` pattern).
    async fn mset(&self, entries: &[(String, String)]) -> Result<(), KvError>;
}
