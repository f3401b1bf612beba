//! Error types for the stream orchestrator.

/// Top-level error type for the livestream backend.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Configuration error (missing or malformed environment values).
    #[error("config error: {0}")]
    Config(String),

    /// Key-value store error (connection, command, or serialization).
    #[error("store error: {0}")]
    Store(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Script-rewrite LLM error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Speech-to-text transcription error (valid-score scoring).
    #[error("STT error: {0}")]
    Stt(String),

    /// No reference material configured for a persona (and no usable default).
    #[error("no persona reference configured for '{0}'")]
    UnknownPersona(String),

    /// An interrupt record carried a kind the processor cannot dispatch.
    #[error("unsupported interrupt kind: {0}")]
    UnsupportedInterruptKind(String),

    /// A queued audio chunk is missing required fields.
    #[error("corrupt audio chunk: {0}")]
    CorruptChunk(String),

    /// Interrupt registration rejected by validation.
    #[error("invalid interrupt: {0}")]
    InvalidInterrupt(String),

    /// I/O error (reference audio, best-take cache, WAV side-writes).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, StreamError>;
