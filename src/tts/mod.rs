//! Speech synthesis.
//!
//! The stream processor talks to synthesis through the [`VoiceSynthesizer`]
//! trait; [`RemoteTts`] is the production engine backed by the remote
//! audio-generation endpoint, with best-of-N selection and an on-disk
//! best-take cache.

mod remote;
pub mod wer;

pub use remote::RemoteTts;

use crate::error::Result;
use async_trait::async_trait;

/// Sampling and selection parameters for one synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    /// Completion token cap.
    pub max_completion_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Nucleus sampling threshold.
    pub top_p: f64,
    /// Top-k sampling cutoff.
    pub top_k: u32,
    /// Repetition-aware sampling window length.
    pub ras_win_len: Option<u32>,
    /// Maximum repeats allowed within the sampling window.
    pub raw_win_max_num_repeat: Option<u32>,
    /// Position of the line within the current plan; enables the best-take
    /// cache and names WAV side-writes.
    pub line_index: Option<u64>,
    /// Number of concurrent takes (None or 1 = single request).
    pub best_of: Option<usize>,
    /// Score takes by word error rate against the requested text and keep
    /// the argmax (only meaningful with `best_of`).
    pub valid_sampling: bool,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            max_completion_tokens: 1024,
            temperature: 1.0,
            top_p: 0.95,
            top_k: 50,
            ras_win_len: None,
            raw_win_max_num_repeat: None,
            line_index: None,
            best_of: None,
            valid_sampling: false,
        }
    }
}

/// Contract the stream processor holds for audio synthesis.
#[async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    /// Synthesize `text` in the given persona's voice.
    ///
    /// Returns base64-encoded audio. Unknown personas fall back to the
    /// default streamer voice.
    async fn synthesize(
        &self,
        persona: &str,
        text: &str,
        opts: &SynthesisOptions,
    ) -> Result<String>;
}
