//! HTTP surface: interrupt registration for viewers, audio drain for the
//! player client.
//!
//! Handlers only touch the interrupt structures and the audio queue; the
//! processor task owns everything else. Validation failures map to 422,
//! everything unexpected to 500.

use crate::error::StreamError;
use crate::store::KvStore;
use crate::stream::types::{AudioChunk, AudioKind, InterruptStatus};
use crate::stream::{AudioQueue, InterruptStore};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Response from `GET /healthz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
}

/// Response from `GET /api/v1/audio`: the drained queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFetchResponse {
    /// Pending chunks in playback order; the queue is now empty.
    pub chunks: Vec<AudioChunk>,
}

/// Request body for `POST /api/v1/audio` (direct chunk push).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioPushRequest {
    /// Category to queue the chunk under.
    pub kind: AudioKind,
    /// Base64-encoded audio data.
    pub audio_base64: String,
    /// Transcript associated with the chunk.
    pub transcript: String,
    /// Persona the chunk is voiced as.
    pub speaker: String,
}

/// Response from `POST /api/v1/audio`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioPushResponse {
    /// Always `"accepted"`.
    pub status: String,
    /// Identifier assigned to the queued chunk.
    pub chunk_id: String,
}

/// Response from `GET /api/v1/count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    /// Number of chunks awaiting pull.
    pub count: usize,
}

/// Request body for `POST /api/v1/interrupt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptRequest {
    /// Type of interrupt (superchat or gift; `general` is rejected).
    pub kind: AudioKind,
    /// Persona voice for the interrupt (required for superchats).
    #[serde(default)]
    pub persona: Option<String>,
    /// Message text (required for superchats).
    #[serde(default)]
    pub message: Option<String>,
}

/// Response from `POST /api/v1/interrupt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptResponse {
    /// Identifier assigned to the registered interrupt.
    pub interrupt_id: String,
    /// Kind of interrupt that was queued.
    pub kind: AudioKind,
    /// Current status (always `queued` at registration).
    pub status: InterruptStatus,
}

/// Error body returned for 4xx/5xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
}

// ---------------------------------------------------------------------------
// State and router
// ---------------------------------------------------------------------------

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    audio: AudioQueue,
    interrupts: InterruptStore,
}

impl AppState {
    /// Build handler state over the shared store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            audio: AudioQueue::new(Arc::clone(&store)),
            interrupts: InterruptStore::new(store),
        }
    }
}

/// Build the HTTP router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handle_health))
        .route("/api/v1/audio", get(handle_pull_audio).post(handle_push_audio))
        .route("/api/v1/count", get(handle_count))
        .route("/api/v1/interrupt", post(handle_interrupt))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Wrapper mapping [`StreamError`] onto HTTP responses.
#[derive(Debug)]
struct ApiFailure(StreamError);

impl From<StreamError> for ApiFailure {
    fn from(e: StreamError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StreamError::InvalidInterrupt(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// `GET /healthz` — liveness probe.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
    })
}

/// `GET /api/v1/audio` — drain queued chunks in playback order.
async fn handle_pull_audio(
    State(state): State<AppState>,
) -> Result<Json<AudioFetchResponse>, ApiFailure> {
    let chunks = state.audio.drain().await?;
    info!("fetched {} audio chunks from queue", chunks.len());
    Ok(Json(AudioFetchResponse { chunks }))
}

/// `POST /api/v1/audio` — accept a chunk pushed by an external producer.
async fn handle_push_audio(
    State(state): State<AppState>,
    Json(request): Json<AudioPushRequest>,
) -> Result<(StatusCode, Json<AudioPushResponse>), ApiFailure> {
    let chunk_id = state
        .audio
        .enqueue(
            request.kind,
            &request.audio_base64,
            &request.transcript,
            &request.speaker,
        )
        .await?;
    info!("received audio chunk {chunk_id} via push for kind {}", request.kind);
    Ok((
        StatusCode::ACCEPTED,
        Json(AudioPushResponse {
            status: "accepted".to_owned(),
            chunk_id,
        }),
    ))
}

/// `GET /api/v1/count` — queue depth without mutation.
async fn handle_count(State(state): State<AppState>) -> Result<Json<CountResponse>, ApiFailure> {
    let count = state.audio.count().await?;
    Ok(Json(CountResponse { count }))
}

/// `POST /api/v1/interrupt` — register a superchat or gift.
async fn handle_interrupt(
    State(state): State<AppState>,
    Json(request): Json<InterruptRequest>,
) -> Result<(StatusCode, Json<InterruptResponse>), ApiFailure> {
    let record = state
        .interrupts
        .register(request.kind, request.persona.clone(), request.message)
        .await?;
    info!(
        "registered {} interrupt {} for persona {}",
        record.kind,
        record.interrupt_id,
        request.persona.as_deref().unwrap_or("default"),
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(InterruptResponse {
            interrupt_id: record.interrupt_id,
            kind: record.kind,
            status: record.status,
        }),
    ))
}
