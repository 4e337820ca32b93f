//! The narrow key-value client contract the background-task subsystem
//! depends on (spec.md §4.A): string values, unordered sets, and TTLs,
//! atomic per key, no multi-key transactions required.

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod traits;

pub use error::KvError;
pub use memory::MemoryKvStore;
pub use redis_store::{RedisKvStore, RedisKvStoreConfig};
pub use traits::KvStore;
