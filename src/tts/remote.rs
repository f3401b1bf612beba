//! Remote TTS engine with best-of-N selection and a best-take cache.

use super::{SynthesisOptions, VoiceSynthesizer};
use crate::api::{ApiError, ApiPool, ChatMessage, ChatRequest, retry_unbounded};
use crate::catalog::{PersonaCatalog, PersonaReference};
use crate::config::TtsConfig;
use crate::error::{Result, StreamError};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::future::{join_all, try_join_all};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Stop sequences for the audio-generation model.
const STOP_TOKENS: &[&str] = &["<|eot_id|>", "<|end_of_text|>", "<|audio_eos|>"];

/// WAV side-writes match the endpoint's raw PCM output format.
const WAV_SAMPLE_RATE: u32 = 24_000;

/// Production synthesizer backed by the remote audio-generation endpoint.
pub struct RemoteTts {
    pool: ApiPool,
    catalog: Arc<PersonaCatalog>,
    config: TtsConfig,
    bests_dir: PathBuf,
}

impl RemoteTts {
    /// Create an engine over the shared client pool and persona catalog.
    ///
    /// `bests_dir` holds cached best takes named
    /// `{persona}_{line_index}_best.wav`; a hit bypasses the remote call.
    #[must_use]
    pub fn new(
        pool: ApiPool,
        catalog: Arc<PersonaCatalog>,
        config: TtsConfig,
        bests_dir: PathBuf,
    ) -> Self {
        Self {
            pool,
            catalog,
            config,
            bests_dir,
        }
    }

    fn cached_best(&self, persona_key: &str, line_index: u64) -> Option<Vec<u8>> {
        let path = self
            .bests_dir
            .join(format!("{persona_key}_{line_index}_best.wav"));
        std::fs::read(&path).ok()
    }

    fn build_request(
        &self,
        reference: &PersonaReference,
        text: &str,
        opts: &SynthesisOptions,
    ) -> ChatRequest {
        let system_prompt = format!(
            "Generate audio following instruction. Speak consistently, naturally, and continuously.\n\
             <|scene_desc_start|>\n{}\n<|scene_desc_end|>",
            reference.scene
        );
        let reference_b64 = BASE64.encode(&reference.audio);

        let mut request = ChatRequest::new(
            &self.config.model,
            vec![
                ChatMessage::system(&system_prompt),
                ChatMessage::user(&reference.transcript),
                ChatMessage::assistant_audio(&reference_b64, &reference.format),
                ChatMessage::user(text),
            ],
        );
        request.modalities = Some(vec!["text".to_owned(), "audio".to_owned()]);
        request.stop = Some(STOP_TOKENS.iter().map(|s| (*s).to_owned()).collect());
        request.max_completion_tokens = Some(opts.max_completion_tokens);
        request.temperature = Some(opts.temperature);
        request.top_p = Some(opts.top_p);
        request.top_k = Some(opts.top_k);
        request.ras_win_len = opts.ras_win_len;
        request.raw_win_max_num_repeat = opts.raw_win_max_num_repeat;
        request
    }

    /// One synthesis request, retried until the endpoint yields audio.
    async fn single_take(&self, request: &ChatRequest) -> String {
        retry_unbounded("TTS synthesis", || {
            let client = self.pool.get().clone();
            let request = request.clone();
            let timeout = self.config.timeout;
            async move {
                let response = client.chat(&request, timeout).await?;
                response
                    .first_audio()
                    .map(str::to_owned)
                    .ok_or_else(|| {
                        ApiError::Malformed("TTS response did not include audio data".to_owned())
                    })
            }
        })
        .await
    }

    /// Transcribe a take and score it against the requested text.
    async fn valid_score(&self, audio_b64: &str, reference_text: &str) -> Result<f64> {
        let mut request = ChatRequest::new(
            &self.config.stt_model,
            vec![
                ChatMessage::system("Transcribe this audio."),
                ChatMessage::user_audio(audio_b64, "wav"),
            ],
        );
        request.max_completion_tokens = Some(1024);
        request.temperature = Some(0.0);

        let response = self
            .pool
            .get()
            .chat(&request, self.config.timeout)
            .await
            .map_err(|e| StreamError::Stt(e.to_string()))?;
        let transcription = response
            .first_text()
            .ok_or_else(|| StreamError::Stt("transcription response had no text".to_owned()))?;

        Ok(super::wer::score(reference_text, transcription))
    }

    fn save_wav(
        &self,
        audio_b64: &str,
        persona_key: &str,
        line_index: Option<u64>,
    ) -> Result<()> {
        if !self.config.save_wav {
            return Ok(());
        }
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = match line_index {
            Some(index) => {
                let seq = next_take_seq(&self.config.output_dir, persona_key, index);
                self.config
                    .output_dir
                    .join(format!("{persona_key}_{index}_{seq}.wav"))
            }
            None => {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or(0);
                self.config
                    .output_dir
                    .join(format!("{persona_key}_{millis}.wav"))
            }
        };

        let pcm = BASE64
            .decode(audio_b64)
            .map_err(|e| StreamError::Tts(format!("invalid base64 audio: {e}")))?;
        write_pcm_wav(&path, &pcm)?;
        info!("saved audio for line {line_index:?} to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl VoiceSynthesizer for RemoteTts {
    async fn synthesize(
        &self,
        persona: &str,
        text: &str,
        opts: &SynthesisOptions,
    ) -> Result<String> {
        let reference = self.catalog.resolve(persona)?;
        let persona_key = reference.key.clone();

        if let Some(line_index) = opts.line_index
            && let Some(cached) = self.cached_best(&persona_key, line_index)
        {
            info!("using cached best audio for line {line_index}");
            return Ok(BASE64.encode(cached));
        }

        let request = self.build_request(&reference, text, opts);

        let audio_b64 = match opts.best_of.filter(|n| *n > 1) {
            Some(n) => {
                debug!("fanning out {n} synthesis takes for persona {persona_key}");
                let takes = join_all((0..n).map(|_| self.single_take(&request))).await;
                if opts.valid_sampling {
                    let scores =
                        try_join_all(takes.iter().map(|take| self.valid_score(take, text)))
                            .await?;
                    info!("valid-sampling scores: {scores:?}");
                    let best_idx = scores
                        .iter()
                        .enumerate()
                        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                        .map_or(0, |(i, _)| i);
                    takes.into_iter().nth(best_idx).unwrap_or_default()
                } else {
                    for extra in takes.iter().skip(1) {
                        self.save_wav(extra, &persona_key, opts.line_index)?;
                    }
                    takes.into_iter().next().unwrap_or_default()
                }
            }
            None => self.single_take(&request).await,
        };

        self.save_wav(&audio_b64, &persona_key, opts.line_index)?;
        Ok(audio_b64)
    }
}

/// Next sequence number for `{persona}_{line}_{seq}.wav` side-writes,
/// scanning files already on disk.
fn next_take_seq(dir: &Path, persona_key: &str, line_index: u64) -> u64 {
    let prefix = format!("{persona_key}_{line_index}_");
    let mut last: Option<u64> = None;
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        if let Some(seq) = rest.strip_suffix(".wav").and_then(|s| s.parse().ok()) {
            last = Some(last.map_or(seq, |prev: u64| prev.max(seq)));
        }
    }
    last.map_or(0, |n| n + 1)
}

/// Write raw 16-bit little-endian PCM as a mono 24 kHz WAV file.
fn write_pcm_wav(path: &Path, pcm: &[u8]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: WAV_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| StreamError::Tts(format!("failed to create WAV {}: {e}", path.display())))?;
    for sample in pcm.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
            .map_err(|e| StreamError::Tts(format!("failed to write WAV sample: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| StreamError::Tts(format!("failed to finalize WAV: {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::catalog::PersonaReference;
    use crate::config::ApiConfig;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn catalog() -> Arc<PersonaCatalog> {
        let nova = PersonaReference {
            key: "nova".to_owned(),
            audio: vec![1, 2, 3, 4],
            format: "wav".to_owned(),
            transcript: "nova reference transcript".to_owned(),
            scene: "nova scene description".to_owned(),
        };
        Arc::new(PersonaCatalog::from_entries([nova], "nova").unwrap())
    }

    fn engine(base_url: &str, config: TtsConfig, bests_dir: PathBuf) -> RemoteTts {
        let pool = ApiPool::new(&ApiConfig {
            keys: vec!["test-key".to_owned()],
            base_url: base_url.to_owned(),
        })
        .unwrap();
        RemoteTts::new(pool, catalog(), config, bests_dir)
    }

    fn audio_response(data: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_json(json!({"choices":[{"message":{"audio":{"data": data}}}]}))
    }

    #[tokio::test]
    async fn single_request_returns_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({
                "model": "audio-generation-v2",
                "modalities": ["text", "audio"],
            })))
            .respond_with(audio_response("QUJD"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tts = engine(&server.uri(), TtsConfig::default(), dir.path().to_owned());
        let audio = tts
            .synthesize("nova", "hello chat", &SynthesisOptions::default())
            .await
            .unwrap();
        assert_eq!(audio, "QUJD");
    }

    #[tokio::test]
    async fn unknown_persona_falls_back_to_default_voice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(audio_response("QUJD"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tts = engine(&server.uri(), TtsConfig::default(), dir.path().to_owned());
        let audio = tts
            .synthesize("nobody_known", "hello", &SynthesisOptions::default())
            .await
            .unwrap();
        assert_eq!(audio, "QUJD");
    }

    #[tokio::test]
    async fn cached_best_take_bypasses_remote_call() {
        let bests = tempfile::tempdir().unwrap();
        let cached_bytes = b"cached-take".to_vec();
        std::fs::write(bests.path().join("nova_7_best.wav"), &cached_bytes).unwrap();

        // Unroutable endpoint: a remote call would hang in retry, so a
        // returned value proves the cache was used.
        let tts = engine(
            "http://127.0.0.1:1",
            TtsConfig::default(),
            bests.path().to_owned(),
        );
        let opts = SynthesisOptions {
            line_index: Some(7),
            ..SynthesisOptions::default()
        };
        let audio = tts.synthesize("nova", "whatever", &opts).await.unwrap();
        assert_eq!(audio, BASE64.encode(&cached_bytes));
    }

    #[tokio::test]
    async fn best_of_fans_out_and_returns_a_take() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(audio_response("QUJD"))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tts = engine(&server.uri(), TtsConfig::default(), dir.path().to_owned());
        let opts = SynthesisOptions {
            best_of: Some(3),
            ..SynthesisOptions::default()
        };
        let audio = tts.synthesize("nova", "hello", &opts).await.unwrap();
        assert_eq!(audio, "QUJD");
    }

    #[tokio::test]
    async fn valid_sampling_scores_takes_and_picks_one() {
        let server = MockServer::start().await;
        let config = TtsConfig {
            model: "tts-model".to_owned(),
            stt_model: "stt-model".to_owned(),
            ..TtsConfig::default()
        };
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "tts-model"})))
            .respond_with(audio_response("QUJD"))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "stt-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"choices":[{"message":{"content":"hello chat"}}]}),
            ))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let tts = engine(&server.uri(), config, dir.path().to_owned());
        let opts = SynthesisOptions {
            best_of: Some(2),
            valid_sampling: true,
            ..SynthesisOptions::default()
        };
        let audio = tts.synthesize("nova", "hello chat", &opts).await.unwrap();
        assert_eq!(audio, "QUJD");
    }

    #[test]
    fn take_sequence_numbers_advance_past_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_take_seq(dir.path(), "nova", 3), 0);

        std::fs::write(dir.path().join("nova_3_0.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("nova_3_4.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("nova_3_best.wav"), b"x").unwrap();
        std::fs::write(dir.path().join("pixel_3_9.wav"), b"x").unwrap();

        assert_eq!(next_take_seq(dir.path(), "nova", 3), 5);
    }

    #[test]
    fn pcm_wav_written_as_mono_24khz() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        write_pcm_wav(&path, &[0x01, 0x00, 0xFF, 0x7F]).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 24_000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, i16::MAX]);
    }
}
