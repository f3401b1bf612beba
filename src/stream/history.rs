//! History log: append-only record of everything the stream has said.

use crate::error::{Result, StreamError};
use crate::store::KvStore;
use crate::stream::types::HistoryRecord;
use std::sync::Arc;
use tracing::debug;

const HISTORY_KEY: &str = "stream:history";

/// Append-only spoken-line log, rendered as LLM context on rewrites.
#[derive(Clone)]
pub struct HistoryLog {
    store: Arc<dyn KvStore>,
}

impl HistoryLog {
    /// Create a log handle.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Append a record; records are never mutated afterwards.
    pub async fn append(&self, record: &HistoryRecord) -> Result<()> {
        let payload = serde_json::to_string(record)
            .map_err(|e| StreamError::Store(format!("failed to serialize history record: {e}")))?;
        self.store.push_tail(HISTORY_KEY, &payload).await?;
        debug!("appended history entry for persona {}", record.persona);
        Ok(())
    }

    /// Render the most recent `limit` entries as `"[persona] text\n"` lines.
    /// A `limit` of zero renders the full log.
    pub async fn snapshot(&self, limit: usize) -> Result<String> {
        let payloads = self.store.tail_range(HISTORY_KEY, limit).await?;
        let mut rendered = String::new();
        for payload in &payloads {
            let record: HistoryRecord = serde_json::from_str(payload)
                .map_err(|e| StreamError::Store(format!("corrupt history record: {e}")))?;
            rendered.push_str(&record.render());
            rendered.push('\n');
        }
        debug!(
            "retrieved {} history entries for snapshot (limit={limit})",
            payloads.len()
        );
        Ok(rendered)
    }

    /// Number of entries in the log.
    pub async fn len(&self) -> Result<usize> {
        self.store.list_len(HISTORY_KEY).await
    }

    /// Clear the log.
    pub async fn reset(&self) -> Result<()> {
        self.store.delete(HISTORY_KEY).await
    }
}
