use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;

use crate::error::KvError;
use crate::traits::KvStore;

#[derive(Debug, Clone)]
enum StoredValue {
    Str(String),
    Set(BTreeSet<String>),
}

type SingleStorage = Arc<Mutex<HashMap<String, StoredValue>>>;
type GlobalStorage = Mutex<HashMap<String, SingleStorage>>;

lazy_static! {
    // keyed by an arbitrary "namespace" id so tests running concurrently
    // against distinct MemoryKvStore handles don't see each other's keys,
    // the same isolation trick the teacher's in-memory pool backend uses.
    static ref GLOBAL_STORAGE: GlobalStorage = Mutex::new(HashMap::new());
}

/// Process-local `KvStore` backed by a `HashMap`. TTLs are accepted but
/// not enforced — there is no background sweep — mirroring the
/// teacher's in-memory pool backend, which does the same for its
/// `_ttl` parameter. Tests that need isolated storage should construct
/// distinct namespaces; tests that need to observe a value written by
/// "another server" should share one.
pub struct MemoryKvStore {
    storage: SingleStorage,
}

impl MemoryKvStore {
    /// A fresh, globally-unique namespace (suitable for a single test).
    pub fn new_isolated() -> Self {
        Self::namespaced(format!("anon-{}", uuid_like_counter()))
    }

    /// A store bound to `namespace`: multiple handles constructed with
    /// the same namespace observe each other's writes. Used to simulate
    /// multiple server processes sharing one KV store in tests.
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        let mut global = GLOBAL_STORAGE.lock().unwrap();
        let storage = global
            .entry(namespace.into())
            .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())))
            .clone();
        Self { storage }
    }
}

fn uuid_like_counter() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), KvError> {
        let mut storage = self.storage.lock().unwrap();
        storage.insert(key.to_string(), StoredValue::Str(value.to_string()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let storage = self.storage.lock().unwrap();
        match storage.get(key) {
            Some(StoredValue::Str(v)) => Ok(Some(v.clone())),
            Some(StoredValue::Set(_)) => Err(KvError::Decode(format!(
                "key {key} holds a set, not a string"
            ))),
            None => Ok(None),
        }
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError> {
        let storage = self.storage.lock().unwrap();
        keys.iter()
            .map(|key| match storage.get(key) {
                Some(StoredValue::Str(v)) => Ok(Some(v.clone())),
                Some(StoredValue::Set(_)) => Err(KvError::Decode(format!(
                    "key {key} holds a set, not a string"
                ))),
                None => Ok(None),
            })
            .collect()
    }

    async fn delete(&self, keys: &[String]) -> Result<(), KvError> {
        let mut storage = self.storage.lock().unwrap();
        for key in keys {
            storage.remove(key);
        }
        Ok(())
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<(), KvError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut storage = self.storage.lock().unwrap();
        match storage
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::Set(BTreeSet::new()))
        {
            StoredValue::Set(set) => {
                set.extend(members.iter().cloned());
                Ok(())
            }
            StoredValue::Str(_) => Err(KvError::Decode(format!(
                "key {key} holds a string, not a set"
            ))),
        }
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<(), KvError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut storage = self.storage.lock().unwrap();
        if let Some(StoredValue::Set(set)) = storage.get_mut(key) {
            for member in members {
                set.remove(member);
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, KvError> {
        let storage = self.storage.lock().unwrap();
        match storage.get(key) {
            Some(StoredValue::Set(set)) => Ok(set.clone()),
            Some(StoredValue::Str(_)) => Err(KvError::Decode(format!(
                "key {key} holds a string, not a set"
            ))),
            None => Ok(BTreeSet::new()),
        }
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), KvError> {
        // TTLs aren't enforced by this backend; nothing to refresh.
        Ok(())
    }

    async fn mset(&self, entries: &[(String, String)]) -> Result<(), KvError> {
        let mut storage = self.storage.lock().unwrap();
        for (key, value) in entries {
            storage.insert(key.clone(), StoredValue::Str(value.clone()));
        }
        Ok(())
    }
}
