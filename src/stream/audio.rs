//! Rendered-audio queue: synthesized chunks awaiting client pull.

use crate::error::{Result, StreamError};
use crate::store::KvStore;
use crate::stream::types::{AudioChunk, AudioKind};
use std::sync::Arc;
use tracing::debug;

const QUEUE_KEY: &str = "stream:audio:queue";
const NEXT_CHUNK_ID_KEY: &str = "stream:audio:next_chunk_id";

/// FIFO of rendered audio chunks, backed by the key-value store.
#[derive(Clone)]
pub struct AudioQueue {
    store: Arc<dyn KvStore>,
}

impl AudioQueue {
    /// Create a queue handle over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Serialize and append a chunk, returning its assigned ID.
    ///
    /// Chunk IDs come from an atomic counter, so they are strictly
    /// increasing integer strings across the process lifetime.
    pub async fn enqueue(
        &self,
        kind: AudioKind,
        audio_base64: &str,
        transcript: &str,
        speaker: &str,
    ) -> Result<String> {
        let chunk_id = self.store.incr(NEXT_CHUNK_ID_KEY).await?.to_string();
        let chunk = AudioChunk {
            chunk_id: chunk_id.clone(),
            kind,
            audio_base64: audio_base64.to_owned(),
            transcript: transcript.to_owned(),
            speaker: speaker.to_owned(),
        };
        let payload = serde_json::to_string(&chunk)
            .map_err(|e| StreamError::Store(format!("failed to serialize audio chunk: {e}")))?;
        self.store.push_tail(QUEUE_KEY, &payload).await?;
        debug!("enqueued {kind} audio chunk {chunk_id} for speaker {speaker}");
        Ok(chunk_id)
    }

    /// Pop and deserialize every pending chunk, in insertion order.
    ///
    /// This is a destructive read: drained chunks belong to the caller.
    ///
    /// # Errors
    ///
    /// Fails with [`StreamError::CorruptChunk`] if a stored payload is
    /// missing `chunk_id`, `transcript`, or `speaker`.
    pub async fn drain(&self) -> Result<Vec<AudioChunk>> {
        let mut chunks = Vec::new();
        while let Some(payload) = self.store.pop_head(QUEUE_KEY).await? {
            let chunk: AudioChunk = serde_json::from_str(&payload)
                .map_err(|e| StreamError::CorruptChunk(e.to_string()))?;
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    /// Number of chunks currently queued, without mutation.
    pub async fn count(&self) -> Result<usize> {
        self.store.list_len(QUEUE_KEY).await
    }

    /// Clear the queue and the chunk counter.
    pub async fn reset(&self) -> Result<()> {
        self.store.delete(QUEUE_KEY).await?;
        self.store.delete(NEXT_CHUNK_ID_KEY).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::store::MemoryStore;

    fn queue() -> AudioQueue {
        AudioQueue::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn chunk_ids_are_strictly_increasing() {
        let queue = queue();
        let a = queue
            .enqueue(AudioKind::General, "AAAA", "one", "nova")
            .await
            .unwrap();
        let b = queue
            .enqueue(AudioKind::Superchat, "BBBB", "two", "pixel")
            .await
            .unwrap();
        assert_eq!(a, "1");
        assert_eq!(b, "2");

        let chunks = queue.drain().await.unwrap();
        let ids: Vec<u64> = chunks
            .iter()
            .map(|c| c.chunk_id.parse().unwrap())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn drain_is_destructive_and_ordered() {
        let queue = queue();
        queue
            .enqueue(AudioKind::General, "AAAA", "first", "nova")
            .await
            .unwrap();
        queue
            .enqueue(AudioKind::General, "BBBB", "second", "nova")
            .await
            .unwrap();

        assert_eq!(queue.count().await.unwrap(), 2);
        let chunks = queue.drain().await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].transcript, "first");
        assert_eq!(chunks[1].transcript, "second");

        assert_eq!(queue.count().await.unwrap(), 0);
        assert!(queue.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_payload_fails_drain() {
        let store = Arc::new(MemoryStore::new());
        let queue = AudioQueue::new(Arc::clone(&store) as Arc<dyn KvStore>);
        store
            .push_tail(QUEUE_KEY, r#"{"chunk_id":"1","kind":"general"}"#)
            .await
            .unwrap();

        let err = queue.drain().await.unwrap_err();
        assert!(matches!(err, StreamError::CorruptChunk(_)));
    }

    #[tokio::test]
    async fn reset_clears_counter_too() {
        let queue = queue();
        queue
            .enqueue(AudioKind::General, "AAAA", "line", "nova")
            .await
            .unwrap();
        queue.reset().await.unwrap();

        assert_eq!(queue.count().await.unwrap(), 0);
        let id = queue
            .enqueue(AudioKind::General, "AAAA", "line", "nova")
            .await
            .unwrap();
        assert_eq!(id, "1");
    }
}
