//! Pooled clients and wire types for the remote AI endpoint.
//!
//! TTS, script rewriting, and transcription all go through one
//! OpenAI-compatible chat-completions endpoint; audio rides along as
//! `input_audio` content parts on the request and an `audio` payload on the
//! response. One client is built per configured API key and picked uniformly
//! at random per call.

use crate::config::ApiConfig;
use crate::error::{Result, StreamError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Error from a single remote call; callers map it into their own category.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Network or protocol failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status.
    #[error("endpoint returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: reqwest::StatusCode,
        /// Response body, truncated for logging.
        body: String,
    },

    /// Response decoded but is missing the expected payload.
    #[error("malformed response: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Chat-completions request, including the extended sampling fields the
/// audio-generation endpoint accepts.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model ID.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Always `false`; the orchestrator consumes whole completions.
    pub stream: bool,
    /// Requested output modalities (`["text","audio"]` for synthesis).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    /// Completion token cap (synthesis requests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    /// Completion token cap (plain chat requests).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Top-k sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Repetition-aware sampling window length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ras_win_len: Option<u32>,
    /// Maximum repeats allowed within the sampling window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_win_max_num_repeat: Option<u32>,
}

impl ChatRequest {
    /// A minimal non-streaming request with everything else unset.
    #[must_use]
    pub fn new(model: &str, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.to_owned(),
            messages,
            stream: false,
            modalities: None,
            max_completion_tokens: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            top_k: None,
            ras_win_len: None,
            raw_win_max_num_repeat: None,
        }
    }
}

/// A single message in a chat request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// `system`, `user`, or `assistant`.
    pub role: String,
    /// Plain text or multi-part content.
    pub content: MessageContent,
}

impl ChatMessage {
    /// Plain-text system message.
    #[must_use]
    pub fn system(text: &str) -> Self {
        Self {
            role: "system".to_owned(),
            content: MessageContent::Text(text.to_owned()),
        }
    }

    /// Plain-text user message.
    #[must_use]
    pub fn user(text: &str) -> Self {
        Self {
            role: "user".to_owned(),
            content: MessageContent::Text(text.to_owned()),
        }
    }

    /// Assistant message carrying inline reference audio.
    #[must_use]
    pub fn assistant_audio(data_base64: &str, format: &str) -> Self {
        Self {
            role: "assistant".to_owned(),
            content: MessageContent::Parts(vec![ContentPart::input_audio(data_base64, format)]),
        }
    }

    /// User message carrying inline audio (transcription requests).
    #[must_use]
    pub fn user_audio(data_base64: &str, format: &str) -> Self {
        Self {
            role: "user".to_owned(),
            content: MessageContent::Parts(vec![ContentPart::input_audio(data_base64, format)]),
        }
    }
}

/// Message content: a plain string or typed parts.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Multi-part content (audio attachments).
    Parts(Vec<ContentPart>),
}

/// One typed content part.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text part.
    Text {
        /// The text.
        text: String,
    },
    /// Inline base64 audio part.
    InputAudio {
        /// The audio payload.
        input_audio: InputAudio,
    },
}

impl ContentPart {
    fn input_audio(data_base64: &str, format: &str) -> Self {
        Self::InputAudio {
            input_audio: InputAudio {
                data: data_base64.to_owned(),
                format: format.to_owned(),
            },
        }
    }
}

/// Inline audio payload on a content part.
#[derive(Debug, Clone, Serialize)]
pub struct InputAudio {
    /// Base64-encoded audio bytes.
    pub data: String,
    /// Container format (file extension, e.g. `wav`).
    pub format: String,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Chat-completions response (only the fields the orchestrator reads).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Completion choices; the orchestrator uses the first.
    pub choices: Vec<ChatChoice>,
}

/// A single completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    /// The generated message.
    pub message: ResponseMessage,
}

/// Generated message: text content and/or an audio payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    /// Text content, when present.
    #[serde(default)]
    pub content: Option<String>,
    /// Synthesized audio, when audio modality was requested.
    #[serde(default)]
    pub audio: Option<AudioPayload>,
}

/// Audio payload on a response message.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioPayload {
    /// Base64-encoded audio bytes.
    pub data: String,
}

impl ChatResponse {
    /// Text of the first choice.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }

    /// Audio data of the first choice.
    #[must_use]
    pub fn first_audio(&self) -> Option<&str> {
        self.choices
            .first()?
            .message
            .audio
            .as_ref()
            .map(|a| a.data.as_str())
    }
}

// ---------------------------------------------------------------------------
// Client pool
// ---------------------------------------------------------------------------

/// One authenticated client for the remote endpoint.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    /// Build a client for `base_url` (including `/v1`) with a bearer key.
    #[must_use]
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
        }
    }

    /// POST a chat-completions request with the given timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on network failure, non-success status, or an
    /// undecodable body.
    pub async fn chat(
        &self,
        request: &ChatRequest,
        timeout: Duration,
    ) -> std::result::Result<ChatResponse, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(512);
            return Err(ApiError::Status { status, body });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(ApiError::from)
    }
}

/// Pool of authenticated clients, one per configured API key.
#[derive(Debug, Clone)]
pub struct ApiPool {
    clients: Vec<ApiClient>,
}

impl ApiPool {
    /// Build the pool from config.
    ///
    /// # Errors
    ///
    /// Returns a config error if no API keys are configured.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        if config.keys.is_empty() {
            return Err(StreamError::Config(
                "no API keys configured for the remote endpoint".to_owned(),
            ));
        }
        let clients = config
            .keys
            .iter()
            .map(|key| ApiClient::new(&config.base_url, key))
            .collect();
        Ok(Self { clients })
    }

    /// Pick a client uniformly at random.
    #[must_use]
    pub fn get(&self) -> &ApiClient {
        let idx = rand::thread_rng().gen_range(0..self.clients.len());
        &self.clients[idx]
    }

    /// Number of pooled clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the pool is empty (never true after construction).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Base delay for the first retry.
const RETRY_BASE: Duration = Duration::from_secs(1);

/// Ceiling on the retry delay.
const RETRY_MAX: Duration = Duration::from_secs(10);

/// Run `op` until it succeeds, sleeping with jittered exponential backoff
/// between attempts (1 s doubling to a 10 s cap).
///
/// Attempts are unbounded: availability is preferred over latency here, so a
/// flapping endpoint stalls the tick rather than failing it. Callers that
/// need a bound must wrap this in their own timeout.
pub async fn retry_unbounded<T, E, F, Fut>(label: &str, mut op: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = RETRY_BASE;
    let mut attempt: u64 = 1;
    loop {
        match op().await {
            Ok(value) => return value,
            Err(e) => {
                let jitter = rand::thread_rng().gen_range(0.0..0.25);
                let sleep_for = delay.mul_f64(1.0 + jitter).min(RETRY_MAX);
                warn!("{label} attempt {attempt} failed: {e}; retrying in {sleep_for:.2?}");
                tokio::time::sleep(sleep_for).await;
                delay = (delay * 2).min(RETRY_MAX);
                attempt += 1;
            }
        }
    }
}
