//! Interrupt store: the viewer-facing queue of superchats and gifts.
//!
//! Two structures share the key-value store: an ordered list of interrupt
//! IDs (the queue) and a hash of ID to serialized record (the data map).
//! HTTP handlers append; the processor pops, advances status, and requeues
//! on failure.

use crate::error::{Result, StreamError};
use crate::store::KvStore;
use crate::stream::types::{AudioKind, InterruptRecord, InterruptStatus, unix_time};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const QUEUE_KEY: &str = "stream:interrupts:queue";
const DATA_KEY: &str = "stream:interrupts:data";

/// Queue + keyed map of viewer interrupts.
#[derive(Clone)]
pub struct InterruptStore {
    store: Arc<dyn KvStore>,
}

impl InterruptStore {
    /// Create a store handle.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Queue a new interrupt for processing and return its record.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidInterrupt`] when `kind` is `general`,
    /// or when a superchat is missing its `persona` or `message`.
    pub async fn register(
        &self,
        kind: AudioKind,
        persona: Option<String>,
        message: Option<String>,
    ) -> Result<InterruptRecord> {
        if kind == AudioKind::General {
            return Err(StreamError::InvalidInterrupt(
                "interrupts must be either superchat or gift".to_owned(),
            ));
        }
        if kind == AudioKind::Superchat {
            if message.as_deref().is_none_or(str::is_empty) {
                return Err(StreamError::InvalidInterrupt(
                    "message is required when kind is superchat".to_owned(),
                ));
            }
            if persona.as_deref().is_none_or(str::is_empty) {
                return Err(StreamError::InvalidInterrupt(
                    "persona is required when kind is superchat".to_owned(),
                ));
            }
        }

        let record = InterruptRecord {
            interrupt_id: Uuid::new_v4().simple().to_string(),
            kind,
            persona,
            message,
            status: InterruptStatus::Queued,
            created_at: unix_time(),
            started_at: None,
            completed_at: None,
            retry_at: None,
        };

        self.save(&record).await?;
        self.store.push_tail(QUEUE_KEY, &record.interrupt_id).await?;

        info!(
            "queued interrupt {} of kind {} for persona={}",
            record.interrupt_id,
            record.kind,
            record.persona.as_deref().unwrap_or("default"),
        );
        Ok(record)
    }

    /// Pop the next pending interrupt and mark it `processing`.
    ///
    /// An ID whose record is missing from the data map is an orphan: it is
    /// logged and dropped, and the pop returns `None`.
    pub async fn pop_next(&self) -> Result<Option<InterruptRecord>> {
        let Some(interrupt_id) = self.store.pop_head(QUEUE_KEY).await? else {
            debug!("no pending interrupts found in queue");
            return Ok(None);
        };

        let Some(payload) = self.store.hash_get(DATA_KEY, &interrupt_id).await? else {
            warn!("interrupt {interrupt_id} missing payload in data store; skipping");
            return Ok(None);
        };

        let mut record: InterruptRecord = serde_json::from_str(&payload)
            .map_err(|e| StreamError::Store(format!("corrupt interrupt record: {e}")))?;
        record.status = InterruptStatus::Processing;
        record.started_at = Some(unix_time());
        self.save(&record).await?;

        info!(
            "dequeued interrupt {} of kind {} for processing",
            record.interrupt_id, record.kind
        );
        Ok(Some(record))
    }

    /// Record a terminal status on an interrupt.
    ///
    /// Missing records are logged and ignored; the queue is never touched.
    pub async fn mark_processed(&self, interrupt_id: &str, status: InterruptStatus) -> Result<()> {
        let Some(payload) = self.store.hash_get(DATA_KEY, interrupt_id).await? else {
            debug!("interrupt {interrupt_id} completed but record missing in data store");
            return Ok(());
        };

        let mut record: InterruptRecord = serde_json::from_str(&payload)
            .map_err(|e| StreamError::Store(format!("corrupt interrupt record: {e}")))?;
        record.status = status;
        record.completed_at = Some(unix_time());
        self.save(&record).await?;

        info!("marked interrupt {interrupt_id} as {status:?}");
        Ok(())
    }

    /// Place an interrupt back onto the queue tail for retry.
    ///
    /// The original `created_at` is preserved; `retry_at` records the
    /// requeue time.
    pub async fn requeue(&self, record: &InterruptRecord) -> Result<()> {
        let mut record = record.clone();
        record.retry_at = Some(unix_time());
        self.save(&record).await?;
        self.store.push_tail(QUEUE_KEY, &record.interrupt_id).await?;
        info!("requeued interrupt {} onto queue", record.interrupt_id);
        Ok(())
    }

    /// Load an interrupt record by ID (status inspection).
    pub async fn load(&self, interrupt_id: &str) -> Result<Option<InterruptRecord>> {
        let Some(payload) = self.store.hash_get(DATA_KEY, interrupt_id).await? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&payload)
            .map_err(|e| StreamError::Store(format!("corrupt interrupt record: {e}")))?;
        Ok(Some(record))
    }

    /// Number of interrupts waiting in the queue.
    pub async fn queue_len(&self) -> Result<usize> {
        self.store.list_len(QUEUE_KEY).await
    }

    /// Clear the queue and the data map.
    pub async fn reset(&self) -> Result<()> {
        self.store.delete(QUEUE_KEY).await?;
        self.store.delete(DATA_KEY).await
    }

    async fn save(&self, record: &InterruptRecord) -> Result<()> {
        let payload = serde_json::to_string(record)
            .map_err(|e| StreamError::Store(format!("failed to serialize interrupt: {e}")))?;
        self.store
            .hash_set(DATA_KEY, &record.interrupt_id, &payload)
            .await
    }
}
