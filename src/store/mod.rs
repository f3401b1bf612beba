//! Key-value persistence behind the stream queues.
//!
//! All four durable structures (script queue, interrupt queue+map, history
//! log, audio queue) live in a Redis-style store and rely only on single-key
//! atomic operations (push, pop, increment, hash-set). The [`KvStore`] trait
//! is the seam: production uses [`RedisStore`], tests use [`MemoryStore`].

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::error::Result;
use async_trait::async_trait;

/// Minimal key-value contract the queues are built on.
///
/// Every operation is atomic per key; the store is the only shared mutable
/// resource between the processor task and the HTTP handlers.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Append a value to the tail of the list at `key`.
    async fn push_tail(&self, key: &str, value: &str) -> Result<()>;

    /// Pop the head of the list at `key`, or `None` when empty.
    async fn pop_head(&self, key: &str) -> Result<Option<String>>;

    /// All values in the list at `key`, head first.
    async fn range_all(&self, key: &str) -> Result<Vec<String>>;

    /// The last `limit` values in the list at `key`, oldest of them first.
    /// A `limit` of zero returns the whole list.
    async fn tail_range(&self, key: &str, limit: usize) -> Result<Vec<String>>;

    /// Length of the list at `key` (zero when absent).
    async fn list_len(&self, key: &str) -> Result<usize>;

    /// Set `field` to `value` in the hash at `key`.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Read `field` from the hash at `key`.
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Atomically increment the integer at `key`, returning the new value.
    /// Missing keys start from zero.
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Delete `key` entirely (list, hash, or counter).
    async fn delete(&self, key: &str) -> Result<()>;
}
