//! Redis-backed [`KvStore`] implementation.

use super::KvStore;
use crate::error::{Result, StreamError};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

/// Production store backed by a shared Redis connection.
///
/// The [`ConnectionManager`] multiplexes one TCP connection and reconnects
/// transparently, so cloning per operation is cheap.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to the store at `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed or the initial connection
    /// cannot be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StreamError::Store(format!("invalid redis url {url:?}: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StreamError::Store(format!("redis connect failed: {e}")))?;
        info!("connected to key-value store at {url}");
        Ok(Self { manager })
    }
}

fn store_err(e: redis::RedisError) -> StreamError {
    StreamError::Store(format!("redis command failed: {e}"))
}

#[async_trait]
impl KvStore for RedisStore {
    async fn push_tail(&self, key: &str, value: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.rpush::<_, _, ()>(key, value).await.map_err(store_err)
    }

    async fn pop_head(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.manager.clone();
        con.lpop(key, None).await.map_err(store_err)
    }

    async fn range_all(&self, key: &str) -> Result<Vec<String>> {
        let mut con = self.manager.clone();
        con.lrange(key, 0, -1).await.map_err(store_err)
    }

    async fn tail_range(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        let mut con = self.manager.clone();
        let start: isize = if limit == 0 {
            0
        } else {
            -isize::try_from(limit).unwrap_or(isize::MAX)
        };
        con.lrange(key, start, -1).await.map_err(store_err)
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let mut con = self.manager.clone();
        con.llen(key).await.map_err(store_err)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(store_err)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut con = self.manager.clone();
        con.hget(key, field).await.map_err(store_err)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut con = self.manager.clone();
        con.incr(key, 1).await.map_err(store_err)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut con = self.manager.clone();
        con.del::<_, ()>(key).await.map_err(store_err)
    }
}
