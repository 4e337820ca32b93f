use std::collections::BTreeSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use backoff::{exponential::ExponentialBackoff, SystemClock};
use redis::Commands;
use serde::{Deserialize, Serialize};

use crate::error::KvError;
use crate::traits::KvStore;

/// Connection parameters for [`RedisKvStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisKvStoreConfig {
    /// e.g. `redis://localhost:6379`
    pub redis_url: String,
}

/// `KvStore` backed by a real Redis (or Valkey) server. Reconnects with
/// exponential backoff on every operation, mirroring
/// `taskdb::RedisTaskDb::get_conn`/`reqpool::Pool::redis_conn` in the
/// teacher repository: a fresh blocking connection is pulled per call
/// rather than held open, and a failed connection attempt rebuilds the
/// client before retrying.
pub struct RedisKvStore {
    client: Arc<StdMutex<redis::Client>>,
}

impl RedisKvStore {
    pub fn open(config: RedisKvStoreConfig) -> Result<Self, KvError> {
        let client = redis::Client::open(config.redis_url)?;
        Ok(Self {
            client: Arc::new(StdMutex::new(client)),
        })
    }

    fn blocking_connect(client: &Arc<StdMutex<redis::Client>>) -> redis::RedisResult<redis::Connection> {
        let backoff: ExponentialBackoff<SystemClock> = ExponentialBackoff {
            initial_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(60),
            max_elapsed_time: Some(Duration::from_secs(300)),
            ..Default::default()
        };

        backoff::retry(backoff, || {
            let mut guard = client.lock().unwrap();
            match guard.get_connection() {
                Ok(conn) => Ok(conn),
                Err(e) => {
                    tracing::error!("RedisKvStore: failed to connect, retrying: {e:?}");
                    Err(backoff::Error::Transient {
                        err: e,
                        retry_after: None,
                    })
                }
            }
        })
        .map_err(|e| match e {
            backoff::Error::Transient { err, .. } | backoff::Error::Permanent(err) => err,
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, KvError>
    where
        T: Send + 'static,
        F: FnOnce(&mut redis::Connection) -> redis::RedisResult<T> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Self::blocking_connect(&client)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| KvError::Unavailable(format!("redis worker task panicked: {e}")))?
        .map_err(KvError::from)
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let key = key.to_string();
        let value = value.to_string();
        let ttl_secs = ttl.as_secs();
        self.run(move |conn| conn.set_ex(key, value, ttl_secs)).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let key = key.to_string();
        self.run(move |conn| conn.get(key)).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys = keys.to_vec();
        self.run(move |conn| conn.get(keys)).await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), KvError> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys = keys.to_vec();
        self.run(move |conn| conn.del::<_, ()>(keys)).await
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<(), KvError> {
        if members.is_empty() {
            return Ok(());
        }
        let key = key.to_string();
        let members = members.to_vec();
        self.run(move |conn| conn.sadd::<_, _, ()>(key, members)).await
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<(), KvError> {
        if members.is_empty() {
            return Ok(());
        }
        let key = key.to_string();
        let members = members.to_vec();
        self.run(move |conn| conn.srem::<_, _, ()>(key, members)).await
    }

    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, KvError> {
        let key = key.to_string();
        let members: Vec<String> = self.run(move |conn| conn.smembers(key)).await?;
        Ok(members.into_iter().collect())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        let key = key.to_string();
        let ttl_secs = ttl.as_secs() as i64;
        self.run(move |conn| conn.expire::<_, ()>(key, ttl_secs)).await
    }

    async fn mset(&self, entries: &[(String, String)]) -> Result<(), KvError> {
        if entries.is_empty() {
            return Ok(());
        }
        let entries = entries.to_vec();
        self.run(move |conn| conn.set_multiple::<_, _, ()>(&entries)).await
    }
}
