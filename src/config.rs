//! Configuration for the livestream backend.
//!
//! All runtime settings come from the environment (the deployment wraps this
//! binary with its own `.env` tooling). [`AppConfig::from_env`] is the single
//! entry point; per-section defaults are also usable directly in tests.

use crate::error::{Result, StreamError};
use std::path::PathBuf;
use std::time::Duration;

/// Built-in opening script, spoken when the stream boots or is reset.
///
/// Each line carries an inline `[Speaker]` tag; the tag wins over the
/// entry-level persona when the line is synthesized.
pub const DEFAULT_SCRIPT: &str = "
[Nova] Chat, we are live! Welcome back to the only stream where the host never needs a water break.
[Nova] Today we are running the backlog you voted for, and yes, I read every single poll comment.
[Nova] Before we start: hydrate, stretch, and somebody explain the lore to the new folks in chat.
[Nova] Alright. Controller in hand, caffeine in bloodstream. Let's get into it.
";

/// Default reaction prompt used when a gift interrupt arrives without text.
pub const DEFAULT_GIFT_PROMPT: &str =
    "A viewer just sent a gift during the livestream. React with excitement and keep the energy high!";

/// Top-level configuration for the backend.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Remote AI endpoint settings (TTS/LLM/STT share one endpoint).
    pub api: ApiConfig,
    /// Key-value store settings.
    pub store: StoreConfig,
    /// Speech synthesis settings.
    pub tts: TtsConfig,
    /// Script-rewrite LLM settings.
    pub llm: LlmConfig,
    /// Stream orchestration settings.
    pub stream: StreamConfig,
    /// HTTP surface settings.
    pub http: HttpConfig,
    /// Root directory for bundled assets (reference audio, best takes).
    pub assets_dir: PathBuf,
}

/// Remote AI endpoint configuration.
#[derive(Debug, Clone, Default)]
pub struct ApiConfig {
    /// API keys, one pooled client per key.
    pub keys: Vec<String>,
    /// Base URL of the OpenAI-compatible endpoint, including `/v1`.
    pub base_url: String,
}

/// Key-value store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis connection URL.
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_owned(),
        }
    }
}

/// Speech synthesis configuration.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Model ID for audio generation.
    pub model: String,
    /// Model ID for transcription (valid-score sampling).
    pub stt_model: String,
    /// Whether to side-save synthesized audio as WAV files.
    pub save_wav: bool,
    /// Directory for WAV side-writes.
    pub output_dir: PathBuf,
    /// Number of concurrent takes per line (None = single request).
    pub best_of: Option<usize>,
    /// Score takes by word error rate and keep the argmax.
    pub valid_sampling: bool,
    /// Per-request timeout for the remote synthesis call.
    pub timeout: Duration,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: "audio-generation-v2".to_owned(),
            stt_model: "audio-understanding-v2".to_owned(),
            save_wav: false,
            output_dir: PathBuf::from("output_audio"),
            best_of: None,
            valid_sampling: false,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Script-rewrite LLM configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat model ID used for script rewrites.
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "qwen3-32b-chat".to_owned(),
        }
    }
}

/// Stream orchestration configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Persona used for script lines without a usable speaker tag.
    pub default_persona: String,
    /// Trigger text handed to the LLM for gift interrupts.
    pub gift_prompt: String,
    /// Script loaded on boot and on reset.
    pub default_script: String,
    /// Sleep between processor ticks.
    pub loop_interval: Duration,
    /// Number of history entries rendered into LLM context.
    pub history_limit: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_persona: "nova".to_owned(),
            gift_prompt: DEFAULT_GIFT_PROMPT.to_owned(),
            default_script: DEFAULT_SCRIPT.to_owned(),
            loop_interval: Duration::from_millis(500),
            history_limit: 50,
        }
    }
}

/// HTTP surface configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Bind address for the axum listener.
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_owned(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable (`STREAM_API_KEYS`,
    /// `STREAM_API_BASE_URL`) is missing or a value fails to parse.
    pub fn from_env() -> Result<Self> {
        let keys = parse_keys(&require_env("STREAM_API_KEYS")?);
        if keys.is_empty() {
            return Err(StreamError::Config(
                "STREAM_API_KEYS contains no usable keys".to_owned(),
            ));
        }

        let loop_interval = parse_interval_secs(
            "PROCESSOR_LOOP_INTERVAL",
            &env_or("PROCESSOR_LOOP_INTERVAL", "0.5"),
        )?;

        let best_of = match std::env::var("TTS_BEST_OF") {
            Ok(raw) => Some(parse_usize("TTS_BEST_OF", &raw)?),
            Err(_) => None,
        };

        Ok(Self {
            api: ApiConfig {
                keys,
                base_url: require_env("STREAM_API_BASE_URL")?,
            },
            store: StoreConfig {
                url: env_or("REDIS_URL", "redis://127.0.0.1:6379/0"),
            },
            tts: TtsConfig {
                model: env_or("TTS_MODEL", "audio-generation-v2"),
                stt_model: env_or("STT_MODEL", "audio-understanding-v2"),
                save_wav: parse_bool(&env_or("SAVE_TTS_WAV", "false")),
                output_dir: PathBuf::from(env_or("OUTPUT_AUDIO_DIR", "output_audio")),
                best_of: best_of.filter(|n| *n > 1),
                valid_sampling: parse_bool(&env_or("TTS_VALID_SAMPLING", "false")),
                timeout: Duration::from_secs(30),
            },
            llm: LlmConfig {
                model: env_or("LLM_MODEL", "qwen3-32b-chat"),
            },
            stream: StreamConfig {
                default_persona: env_or("DEFAULT_STREAMER_PERSONA", "nova"),
                gift_prompt: env_or("DEFAULT_GIFT_PROMPT", DEFAULT_GIFT_PROMPT),
                default_script: DEFAULT_SCRIPT.to_owned(),
                loop_interval,
                history_limit: parse_usize(
                    "HISTORY_SNAPSHOT_LIMIT",
                    &env_or("HISTORY_SNAPSHOT_LIMIT", "50"),
                )?,
            },
            http: HttpConfig {
                bind: env_or("HTTP_BIND", "0.0.0.0:8000"),
            },
            assets_dir: PathBuf::from(env_or("ASSETS_DIR", "assets")),
        })
    }

    /// Directory holding cached best takes (`{persona}_{line}_best.wav`).
    #[must_use]
    pub fn bests_dir(&self) -> PathBuf {
        self.assets_dir.join("bests")
    }

    /// Directory holding persona reference audio.
    #[must_use]
    pub fn reference_audio_dir(&self) -> PathBuf {
        self.assets_dir.join("reference_audio")
    }
}

fn require_env(key: &str) -> Result<String> {
    let value = std::env::var(key)
        .map_err(|_| StreamError::Config(format!("required env var is missing: {key}")))?;
    if value.trim().is_empty() {
        return Err(StreamError::Config(format!("env var is empty: {key}")));
    }
    Ok(value)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_usize(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|e| StreamError::Config(format!("invalid {key} ({raw:?}): {e}")))
}

fn parse_interval_secs(key: &str, raw: &str) -> Result<Duration> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|e| StreamError::Config(format!("invalid {key} ({raw:?}): {e}")))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(StreamError::Config(format!(
            "{key} must be a non-negative number of seconds, got {raw:?}"
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn keys_split_and_trim() {
        let keys = parse_keys(" key-a , key-b ,, key-c");
        assert_eq!(keys, vec!["key-a", "key-b", "key-c"]);
    }

    #[test]
    fn keys_empty_input_yields_nothing() {
        assert!(parse_keys("").is_empty());
        assert!(parse_keys(" , ,").is_empty());
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        for raw in ["1", "true", "TRUE", "yes", "on"] {
            assert!(parse_bool(raw), "{raw} should parse as true");
        }
        for raw in ["0", "false", "no", "off", ""] {
            assert!(!parse_bool(raw), "{raw} should parse as false");
        }
    }

    #[test]
    fn interval_parses_fractional_seconds() {
        let interval = parse_interval_secs("PROCESSOR_LOOP_INTERVAL", "0.5").unwrap();
        assert_eq!(interval, Duration::from_millis(500));
    }

    #[test]
    fn interval_rejects_garbage_and_negatives() {
        assert!(parse_interval_secs("PROCESSOR_LOOP_INTERVAL", "fast").is_err());
        assert!(parse_interval_secs("PROCESSOR_LOOP_INTERVAL", "-1").is_err());
    }

    #[test]
    fn default_script_lines_carry_speaker_tags() {
        let lines: Vec<&str> = DEFAULT_SCRIPT
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        assert!(!lines.is_empty());
        for line in lines {
            assert!(line.starts_with('['), "line missing speaker tag: {line}");
        }
    }
}
