//! Script queue: ordered upcoming dialogue lines for the current plan.

use crate::error::{Result, StreamError};
use crate::store::KvStore;
use crate::stream::types::{AudioKind, ScriptEntry};
use std::sync::Arc;
use tracing::{debug, info};

const QUEUE_KEY: &str = "stream:script:queue";

/// FIFO of upcoming dialogue lines, backed by the key-value store.
#[derive(Clone)]
pub struct ScriptQueue {
    store: Arc<dyn KvStore>,
    default_persona: String,
}

impl ScriptQueue {
    /// Create a queue handle; `default_persona` tags every stored entry.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, default_persona: &str) -> Self {
        Self {
            store,
            default_persona: default_persona.to_owned(),
        }
    }

    /// Atomically replace the queue with the lines of `script`.
    ///
    /// Input is split on newlines; blank lines are dropped. Every entry is
    /// tagged with `kind` and the default persona. Returns the number of
    /// lines loaded (zero clears the queue without error).
    pub async fn replace(&self, script: &str, kind: AudioKind) -> Result<usize> {
        self.store.delete(QUEUE_KEY).await?;

        let lines: Vec<&str> = script
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            info!("received empty script; script queue cleared");
            return Ok(0);
        }

        for line in &lines {
            let entry = ScriptEntry {
                line: (*line).to_owned(),
                kind,
                persona: self.default_persona.clone(),
            };
            let payload = serde_json::to_string(&entry)
                .map_err(|e| StreamError::Store(format!("failed to serialize script entry: {e}")))?;
            self.store.push_tail(QUEUE_KEY, &payload).await?;
        }

        info!("loaded {} lines into script queue with kind {kind}", lines.len());
        Ok(lines.len())
    }

    /// Remove and return the head entry, or `None` when the plan is spent.
    pub async fn pop_head(&self) -> Result<Option<ScriptEntry>> {
        let Some(payload) = self.store.pop_head(QUEUE_KEY).await? else {
            return Ok(None);
        };
        let entry = serde_json::from_str(&payload)
            .map_err(|e| StreamError::Store(format!("corrupt script entry: {e}")))?;
        Ok(Some(entry))
    }

    /// Newline-joined text of all pending lines, without consuming them.
    ///
    /// This is the "remaining script" handed to the LLM on a rewrite.
    pub async fn snapshot_remaining(&self) -> Result<String> {
        let payloads = self.store.range_all(QUEUE_KEY).await?;
        let mut lines = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            let entry: ScriptEntry = serde_json::from_str(payload)
                .map_err(|e| StreamError::Store(format!("corrupt script entry: {e}")))?;
            let line = entry.line.trim().to_owned();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        debug!("collected {} script lines from queue", lines.len());
        Ok(lines.join("\n"))
    }

    /// Number of pending lines.
    pub async fn len(&self) -> Result<usize> {
        self.store.list_len(QUEUE_KEY).await
    }

    /// Clear the queue.
    pub async fn reset(&self) -> Result<()> {
        self.store.delete(QUEUE_KEY).await
    }
}
