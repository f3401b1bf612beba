//! In-memory store used by tests and local development without Redis.

use super::KvStore;
use crate::error::{Result, StreamError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Process-local [`KvStore`] with the same single-key atomicity guarantees
/// as Redis (one mutex guards every operation).
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    counters: HashMap<String, i64>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StreamError::Store("memory store mutex poisoned".to_owned()))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn push_tail(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .lists
            .entry(key.to_owned())
            .or_default()
            .push_back(value.to_owned());
        Ok(())
    }

    async fn pop_head(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.lock()?;
        Ok(inner.lists.get_mut(key).and_then(VecDeque::pop_front))
    }

    async fn range_all(&self, key: &str) -> Result<Vec<String>> {
        let inner = self.lock()?;
        Ok(inner
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn tail_range(&self, key: &str, limit: usize) -> Result<Vec<String>> {
        let inner = self.lock()?;
        Ok(inner
            .lists
            .get(key)
            .map(|list| {
                let skip = if limit == 0 {
                    0
                } else {
                    list.len().saturating_sub(limit)
                };
                list.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let inner = self.lock()?;
        Ok(inner.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .hashes
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let inner = self.lock()?;
        Ok(inner.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut inner = self.lock()?;
        let counter = inner.counters.entry(key.to_owned()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.lists.remove(key);
        inner.hashes.remove(key);
        inner.counters.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn list_is_fifo() {
        let store = MemoryStore::new();
        store.push_tail("q", "a").await.unwrap();
        store.push_tail("q", "b").await.unwrap();
        store.push_tail("q", "c").await.unwrap();

        assert_eq!(store.list_len("q").await.unwrap(), 3);
        assert_eq!(store.pop_head("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop_head("q").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.pop_head("q").await.unwrap().as_deref(), Some("c"));
        assert_eq!(store.pop_head("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn tail_range_returns_most_recent() {
        let store = MemoryStore::new();
        for v in ["1", "2", "3", "4"] {
            store.push_tail("log", v).await.unwrap();
        }
        assert_eq!(store.tail_range("log", 2).await.unwrap(), vec!["3", "4"]);
        assert_eq!(
            store.tail_range("log", 0).await.unwrap(),
            vec!["1", "2", "3", "4"]
        );
        assert_eq!(
            store.tail_range("log", 10).await.unwrap(),
            vec!["1", "2", "3", "4"]
        );
    }

    #[tokio::test]
    async fn hash_set_get() {
        let store = MemoryStore::new();
        store.hash_set("h", "id1", "{}").await.unwrap();
        assert_eq!(store.hash_get("h", "id1").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(store.hash_get("h", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_is_monotone_from_one() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("n").await.unwrap(), 1);
        assert_eq!(store.incr("n").await.unwrap(), 2);
        assert_eq!(store.incr("n").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn delete_clears_every_shape() {
        let store = MemoryStore::new();
        store.push_tail("k", "v").await.unwrap();
        store.hash_set("k", "f", "v").await.unwrap();
        store.incr("k").await.unwrap();

        store.delete("k").await.unwrap();

        assert_eq!(store.list_len("k").await.unwrap(), 0);
        assert_eq!(store.hash_get("k", "f").await.unwrap(), None);
        assert_eq!(store.incr("k").await.unwrap(), 1);
    }
}
