//! Record shapes shared across the stream queues.
//!
//! Everything here is persisted to the key-value store as JSON; field names
//! are part of the on-wire contract with the player frontend.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Category of a script line, interrupt, or audio chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioKind {
    /// Regular scripted dialogue.
    General,
    /// Paid viewer message voiced on stream.
    Superchat,
    /// Paid non-textual viewer event.
    Gift,
}

impl AudioKind {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Superchat => "superchat",
            Self::Gift => "gift",
        }
    }
}

impl std::fmt::Display for AudioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One synthesized audio payload awaiting client pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioChunk {
    /// Monotone integer rendered as a string.
    pub chunk_id: String,
    /// Category the chunk was produced under.
    pub kind: AudioKind,
    /// Base64-encoded audio data.
    pub audio_base64: String,
    /// Text that was synthesized.
    pub transcript: String,
    /// Persona key the chunk was voiced as.
    pub speaker: String,
}

/// One upcoming dialogue line in the script queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptEntry {
    /// Line text, usually carrying a leading `[Speaker]` tag.
    pub line: String,
    /// Category the line will be synthesized under.
    pub kind: AudioKind,
    /// Fallback persona when the line has no speaker tag.
    pub persona: String,
}

/// Split an inline `[Speaker]` tag off a script line.
///
/// Returns `(speaker, spoken_text)` when the line starts with a bracketed
/// tag, `None` otherwise. The tag wins over the entry-level persona.
#[must_use]
pub fn parse_speaker_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix('[')?;
    let (speaker, content) = rest.split_once(']')?;
    let speaker = speaker.trim();
    if speaker.is_empty() {
        return None;
    }
    Some((speaker, content.trim()))
}

/// Processing state of a viewer interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptStatus {
    /// Registered, waiting for the processor.
    Queued,
    /// Popped by the processor this tick.
    Processing,
    /// Terminal: audio produced and script rewrite attempted (superchat).
    Processed,
    /// Terminal: script rewrite queued, no direct audio (gift).
    QueuedScript,
}

/// Full record describing a viewer interrupt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptRecord {
    /// Opaque identifier, also the hash field in the data map.
    pub interrupt_id: String,
    /// Superchat or gift.
    pub kind: AudioKind,
    /// Persona to voice the interrupt as (required for superchats).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    /// Message text (required for superchats).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Current processing state.
    pub status: InterruptStatus,
    /// Unix seconds at registration; preserved across requeues.
    pub created_at: f64,
    /// Unix seconds when the processor picked the interrupt up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<f64>,
    /// Unix seconds when a terminal status was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<f64>,
    /// Unix seconds of the most recent requeue after a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<f64>,
}

/// A single line that has already been spoken on stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Persona key that voiced the line.
    pub persona: String,
    /// Spoken text (speaker tag stripped).
    pub text: String,
    /// Category the line was produced under.
    pub kind: AudioKind,
    /// Audio chunk this record corresponds to.
    pub chunk_id: String,
    /// Unix seconds when the chunk was enqueued.
    pub timestamp: f64,
}

impl HistoryRecord {
    /// Render the record for LLM consumption.
    #[must_use]
    pub fn render(&self) -> String {
        format!("[{}] {}", self.persona, self.text)
    }
}

/// Current Unix time in seconds, fractional.
#[must_use]
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
