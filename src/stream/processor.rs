//! Stream processor: the loop that converts scripts and interrupts into
//! audio chunks.
//!
//! One long-lived worker owns all writes to the script queue, history log,
//! audio queue, and interrupt status. Each tick does one unit of work:
//! interrupts first, then the next script line. HTTP handlers only ever
//! append interrupts and drain audio, so no locks are needed beyond the
//! store's single-key atomicity.

use crate::catalog::normalize_key;
use crate::config::AppConfig;
use crate::error::{Result, StreamError};
use crate::llm::ScriptWriter;
use crate::store::KvStore;
use crate::stream::audio::AudioQueue;
use crate::stream::history::HistoryLog;
use crate::stream::interrupts::InterruptStore;
use crate::stream::script::ScriptQueue;
use crate::stream::types::{
    AudioKind, HistoryRecord, InterruptRecord, InterruptStatus, parse_speaker_line, unix_time,
};
use crate::tts::{SynthesisOptions, VoiceSynthesizer};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Recovery delay after a failed tick.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What a single tick accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A superchat was voiced and a rewrite attempted.
    Superchat {
        /// Chunk produced for the superchat message.
        chunk_id: String,
        /// Persona the message was voiced as.
        persona: String,
        /// The message text.
        text: String,
    },
    /// A gift triggered a rewrite; no audio is produced directly.
    Gift {
        /// Whether the LLM produced a non-empty replacement script.
        script_replaced: bool,
    },
    /// One script line was synthesized.
    ScriptLine {
        /// Chunk produced for the line.
        chunk_id: String,
        /// Category the line carried.
        kind: AudioKind,
        /// Persona the line was voiced as.
        speaker: String,
        /// Spoken text (speaker tag stripped).
        text: String,
    },
}

/// Core orchestrator tying the queues to the remote engines.
pub struct StreamProcessor {
    audio: AudioQueue,
    script: ScriptQueue,
    interrupts: InterruptStore,
    history: HistoryLog,
    tts: Arc<dyn VoiceSynthesizer>,
    writer: Arc<dyn ScriptWriter>,
    config: crate::config::StreamConfig,
    tts_best_of: Option<usize>,
    tts_valid_sampling: bool,
    /// Position within the current plan; local to the processor.
    line_index: u64,
}

impl StreamProcessor {
    /// Build a processor over the shared store and engines.
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        tts: Arc<dyn VoiceSynthesizer>,
        writer: Arc<dyn ScriptWriter>,
        config: &AppConfig,
    ) -> Self {
        Self {
            audio: AudioQueue::new(Arc::clone(&store)),
            script: ScriptQueue::new(Arc::clone(&store), &config.stream.default_persona),
            interrupts: InterruptStore::new(Arc::clone(&store)),
            history: HistoryLog::new(store),
            tts,
            writer,
            config: config.stream.clone(),
            tts_best_of: config.tts.best_of,
            tts_valid_sampling: config.tts.valid_sampling,
            line_index: 0,
        }
    }

    /// Process the next unit of work (interrupt or script line).
    ///
    /// Interrupts preempt the script. A failed interrupt is requeued at the
    /// tail (at-least-once) and the error surfaces to the driver; a rewrite
    /// failure alone is best-effort and never fails the tick.
    pub async fn process_once(&mut self) -> Result<Option<TickOutcome>> {
        if let Some(record) = self.interrupts.pop_next().await? {
            info!(
                "processing interrupt {} ({})",
                record.interrupt_id, record.kind
            );
            return match self.handle_interrupt(&record).await {
                Ok(outcome) => Ok(Some(outcome)),
                Err(e) => {
                    warn!(
                        "interrupt {} failed ({e}); requeueing for retry",
                        record.interrupt_id
                    );
                    self.interrupts.requeue(&record).await?;
                    Err(e)
                }
            };
        }

        debug!("no interrupts pending; attempting to process script queue");
        self.handle_script_line().await
    }

    /// Clear every queue and reload the built-in default script.
    pub async fn reset_state(&mut self) -> Result<()> {
        self.audio.reset().await?;
        self.interrupts.reset().await?;
        self.history.reset().await?;
        let default_script = self.config.default_script.clone();
        self.replace_script(&default_script, AudioKind::General).await?;
        info!("stream state reset; default script loaded");
        Ok(())
    }

    /// Run the tick loop until cancelled.
    ///
    /// The current tick always completes; cancellation is honored between
    /// ticks. A failed tick logs and backs off for one second.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "stream processor started (tick interval {:?})",
            self.config.loop_interval
        );
        loop {
            let sleep_for = match self.process_once().await {
                Ok(Some(outcome)) => {
                    debug!("tick completed: {outcome:?}");
                    self.config.loop_interval
                }
                Ok(None) => self.config.loop_interval,
                Err(e) => {
                    error!("processor tick failed: {e}");
                    ERROR_BACKOFF
                }
            };
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(sleep_for) => {}
            }
        }
        info!("stream processor stopped");
    }

    async fn handle_interrupt(&mut self, record: &InterruptRecord) -> Result<TickOutcome> {
        match record.kind {
            AudioKind::Superchat => self.process_superchat(record).await,
            AudioKind::Gift => self.process_gift(record).await,
            AudioKind::General => Err(StreamError::UnsupportedInterruptKind(
                record.kind.to_string(),
            )),
        }
    }

    async fn process_superchat(&mut self, record: &InterruptRecord) -> Result<TickOutcome> {
        let message = record.message.as_deref().ok_or_else(|| {
            StreamError::InvalidInterrupt("superchat interrupt is missing its message".to_owned())
        })?;
        let persona = record
            .persona
            .as_deref()
            .unwrap_or(&self.config.default_persona);
        let speaker = normalize_key(persona);

        info!(
            "generating superchat audio for interrupt {} with persona {speaker}",
            record.interrupt_id
        );
        let audio_b64 = self
            .tts
            .synthesize(persona, message, &self.synthesis_opts(None))
            .await?;
        let chunk_id = self
            .audio
            .enqueue(AudioKind::Superchat, &audio_b64, message, &speaker)
            .await?;
        info!("superchat audio chunk ready: {chunk_id}");

        self.history
            .append(&HistoryRecord {
                persona: speaker.clone(),
                text: message.to_owned(),
                kind: AudioKind::Superchat,
                chunk_id: chunk_id.clone(),
                timestamp: unix_time(),
            })
            .await?;

        let history_snapshot = self.history.snapshot(self.config.history_limit).await?;
        let remaining = self.script.snapshot_remaining().await?;
        match self
            .writer
            .rewrite(&history_snapshot, message, &remaining, Some(&speaker))
            .await
        {
            Ok(script) if !script.trim().is_empty() => {
                info!("LLM returned new script in response to superchat interrupt");
                self.replace_script(&script, AudioKind::General).await?;
            }
            Ok(_) => info!("LLM returned no follow-up script for superchat interrupt"),
            Err(e) => warn!("script rewrite failed; keeping current script: {e}"),
        }

        self.interrupts
            .mark_processed(&record.interrupt_id, InterruptStatus::Processed)
            .await?;

        Ok(TickOutcome::Superchat {
            chunk_id,
            persona: speaker,
            text: message.to_owned(),
        })
    }

    async fn process_gift(&mut self, record: &InterruptRecord) -> Result<TickOutcome> {
        let history_snapshot = self.history.snapshot(self.config.history_limit).await?;
        let remaining = self.script.snapshot_remaining().await?;
        let gift_prompt = self.config.gift_prompt.clone();

        let script_replaced = match self
            .writer
            .rewrite(&history_snapshot, &gift_prompt, &remaining, None)
            .await
        {
            Ok(script) if !script.trim().is_empty() => {
                info!(
                    "LLM generated gift follow-up script for interrupt {}",
                    record.interrupt_id
                );
                self.replace_script(&script, AudioKind::Gift).await?;
                true
            }
            Ok(_) => {
                info!(
                    "LLM returned no script for gift interrupt {}",
                    record.interrupt_id
                );
                false
            }
            Err(e) => {
                warn!("script rewrite failed; keeping current script: {e}");
                false
            }
        };

        self.interrupts
            .mark_processed(&record.interrupt_id, InterruptStatus::QueuedScript)
            .await?;

        Ok(TickOutcome::Gift { script_replaced })
    }

    async fn handle_script_line(&mut self) -> Result<Option<TickOutcome>> {
        let Some(entry) = self.script.pop_head().await? else {
            return Ok(None);
        };

        let line = entry.line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        // The inline [Speaker] tag wins over the entry-level persona.
        let (persona, text) = match parse_speaker_line(line) {
            Some((speaker, content)) => (speaker.to_owned(), content.to_owned()),
            None => (entry.persona.clone(), line.to_owned()),
        };
        let speaker = normalize_key(&persona);

        let opts = self.synthesis_opts(Some(self.line_index));
        let audio_b64 = self.tts.synthesize(&persona, &text, &opts).await?;
        let chunk_id = self
            .audio
            .enqueue(entry.kind, &audio_b64, &text, &speaker)
            .await?;

        self.history
            .append(&HistoryRecord {
                persona: speaker.clone(),
                text: text.clone(),
                kind: entry.kind,
                chunk_id: chunk_id.clone(),
                timestamp: unix_time(),
            })
            .await?;
        self.line_index += 1;

        info!(
            "generated script line audio chunk {chunk_id} ({} persona {speaker})",
            entry.kind
        );

        Ok(Some(TickOutcome::ScriptLine {
            chunk_id,
            kind: entry.kind,
            speaker,
            text,
        }))
    }

    async fn replace_script(&mut self, script: &str, kind: AudioKind) -> Result<()> {
        self.script.replace(script, kind).await?;
        self.line_index = 0;
        Ok(())
    }

    fn synthesis_opts(&self, line_index: Option<u64>) -> SynthesisOptions {
        SynthesisOptions {
            max_completion_tokens: 1024,
            temperature: 1.1,
            ras_win_len: Some(100),
            raw_win_max_num_repeat: Some(20),
            line_index,
            best_of: self.tts_best_of,
            valid_sampling: self.tts_valid_sampling,
            ..SynthesisOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Synthesizer stub: records calls, optionally failing the first N.
    struct StubSynth {
        audio: String,
        fail_remaining: AtomicUsize,
        calls: Mutex<Vec<(String, String, Option<u64>)>>,
    }

    impl StubSynth {
        fn ok(audio: &str) -> Arc<Self> {
            Self::failing(audio, 0)
        }

        fn failing(audio: &str, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                audio: audio.to_owned(),
                fail_remaining: AtomicUsize::new(failures),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String, Option<u64>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VoiceSynthesizer for StubSynth {
        async fn synthesize(
            &self,
            persona: &str,
            text: &str,
            opts: &SynthesisOptions,
        ) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((persona.to_owned(), text.to_owned(), opts.line_index));
            let remaining = self.fail_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(StreamError::Tts("injected failure".to_owned()));
            }
            Ok(self.audio.clone())
        }
    }

    /// Writer stub returning a fixed script, an empty one, or an error.
    struct StubWriter {
        script: Option<String>,
        fail: bool,
    }

    impl StubWriter {
        fn returning(script: &str) -> Arc<Self> {
            Arc::new(Self {
                script: Some(script.to_owned()),
                fail: false,
            })
        }

        fn empty() -> Arc<Self> {
            Arc::new(Self {
                script: Some(String::new()),
                fail: false,
            })
        }

        fn erroring() -> Arc<Self> {
            Arc::new(Self {
                script: None,
                fail: true,
            })
        }
    }

    #[async_trait]
    impl ScriptWriter for StubWriter {
        async fn rewrite(
            &self,
            _history: &str,
            _trigger: &str,
            _remaining: &str,
            _sender: Option<&str>,
        ) -> Result<String> {
            if self.fail {
                return Err(StreamError::Llm("injected rewrite failure".to_owned()));
            }
            Ok(self.script.clone().unwrap_or_default())
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        processor: StreamProcessor,
    }

    impl Harness {
        fn new(tts: Arc<dyn VoiceSynthesizer>, writer: Arc<dyn ScriptWriter>) -> Self {
            let store = Arc::new(MemoryStore::new());
            let config = AppConfig::default();
            let processor = StreamProcessor::new(
                Arc::clone(&store) as Arc<dyn KvStore>,
                tts,
                writer,
                &config,
            );
            Self { store, processor }
        }

        fn kv(&self) -> Arc<dyn KvStore> {
            Arc::clone(&self.store) as Arc<dyn KvStore>
        }

        fn audio(&self) -> AudioQueue {
            AudioQueue::new(self.kv())
        }

        fn interrupts(&self) -> InterruptStore {
            InterruptStore::new(self.kv())
        }

        fn script(&self) -> ScriptQueue {
            ScriptQueue::new(self.kv(), "nova")
        }

        fn history(&self) -> HistoryLog {
            HistoryLog::new(self.kv())
        }
    }

    #[tokio::test]
    async fn reset_then_tick_speaks_first_default_line() {
        let synth = StubSynth::ok("QUJD");
        let mut h = Harness::new(synth.clone(), StubWriter::empty());
        h.processor.reset_state().await.unwrap();

        let outcome = h.processor.process_once().await.unwrap().unwrap();
        let TickOutcome::ScriptLine { speaker, text, .. } = &outcome else {
            panic!("expected a script line, got {outcome:?}");
        };
        assert_eq!(speaker, "nova");
        assert!(text.starts_with("Chat, we are live!"));

        let chunks = h.audio().drain().await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].speaker, "nova");
        assert_eq!(&chunks[0].transcript, text);
        assert_eq!(chunks[0].audio_base64, "QUJD");

        // The matching history record exists with the same chunk_id/speaker.
        let snapshot = h.history().snapshot(0).await.unwrap();
        assert!(snapshot.starts_with("[nova] Chat, we are live!"));
    }

    #[tokio::test]
    async fn empty_queues_tick_returns_none() {
        let mut h = Harness::new(StubSynth::ok("QUJD"), StubWriter::empty());
        assert!(h.processor.process_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn superchat_preempts_script_and_replaces_plan() {
        let synth = StubSynth::ok("QUJD");
        let writer = StubWriter::returning("[Speed] ok\n[Speed] done");
        let mut h = Harness::new(synth.clone(), writer);

        h.script()
            .replace("[Nova] one\n[Nova] two\n[Nova] three", AudioKind::General)
            .await
            .unwrap();
        let record = h
            .interrupts()
            .register(
                AudioKind::Superchat,
                Some("speed".to_owned()),
                Some("Yo!".to_owned()),
            )
            .await
            .unwrap();

        let outcome = h.processor.process_once().await.unwrap().unwrap();
        assert!(matches!(outcome, TickOutcome::Superchat { .. }));

        let chunks = h.audio().drain().await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, AudioKind::Superchat);
        assert_eq!(chunks[0].speaker, "speed");
        assert_eq!(chunks[0].transcript, "Yo!");

        let loaded = h.interrupts().load(&record.interrupt_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InterruptStatus::Processed);

        // The old plan is gone; the rewrite is spoken next, line_index reset.
        let one = h.processor.process_once().await.unwrap().unwrap();
        let two = h.processor.process_once().await.unwrap().unwrap();
        let texts: Vec<String> = [one, two]
            .iter()
            .map(|o| match o {
                TickOutcome::ScriptLine { speaker, text, .. } => {
                    assert_eq!(speaker, "speed");
                    text.clone()
                }
                other => panic!("expected script line, got {other:?}"),
            })
            .collect();
        assert_eq!(texts, vec!["ok", "done"]);
        assert!(h.processor.process_once().await.unwrap().is_none());

        let line_indices: Vec<Option<u64>> =
            synth.calls().iter().map(|(_, _, idx)| *idx).collect();
        // Superchat synthesis carries no line index; the new plan restarts at 0.
        assert_eq!(line_indices, vec![None, Some(0), Some(1)]);
    }

    #[tokio::test]
    async fn gift_produces_no_audio_but_queues_script() {
        let writer = StubWriter::returning("[Nova] thanks for the gift!");
        let mut h = Harness::new(StubSynth::ok("QUJD"), writer);

        h.script()
            .replace("[Nova] one\n[Nova] two", AudioKind::General)
            .await
            .unwrap();
        let record = h
            .interrupts()
            .register(AudioKind::Gift, None, None)
            .await
            .unwrap();

        let outcome = h.processor.process_once().await.unwrap().unwrap();
        assert_eq!(outcome, TickOutcome::Gift { script_replaced: true });

        assert!(h.audio().drain().await.unwrap().is_empty());
        let loaded = h.interrupts().load(&record.interrupt_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InterruptStatus::QueuedScript);

        let remaining = h.script().snapshot_remaining().await.unwrap();
        assert_eq!(remaining, "[Nova] thanks for the gift!");

        let entry = h.script().pop_head().await.unwrap().unwrap();
        assert_eq!(entry.kind, AudioKind::Gift);
    }

    #[tokio::test]
    async fn failed_superchat_is_requeued_then_retried() {
        let synth = StubSynth::failing("QUJD", 1);
        let mut h = Harness::new(synth.clone(), StubWriter::empty());

        let record = h
            .interrupts()
            .register(
                AudioKind::Superchat,
                Some("nova".to_owned()),
                Some("hello".to_owned()),
            )
            .await
            .unwrap();

        let err = h.processor.process_once().await.unwrap_err();
        assert!(matches!(err, StreamError::Tts(_)));
        assert_eq!(h.interrupts().queue_len().await.unwrap(), 1);
        let loaded = h.interrupts().load(&record.interrupt_id).await.unwrap().unwrap();
        assert!(loaded.retry_at.is_some());

        // Next tick consumes the requeued interrupt successfully.
        let outcome = h.processor.process_once().await.unwrap().unwrap();
        assert!(matches!(outcome, TickOutcome::Superchat { .. }));
        assert_eq!(h.audio().count().await.unwrap(), 1);
        let loaded = h.interrupts().load(&record.interrupt_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InterruptStatus::Processed);
    }

    #[tokio::test]
    async fn empty_rewrite_keeps_current_script() {
        let mut h = Harness::new(StubSynth::ok("QUJD"), StubWriter::empty());
        h.script()
            .replace("[Nova] keep me", AudioKind::General)
            .await
            .unwrap();
        h.interrupts()
            .register(
                AudioKind::Superchat,
                Some("nova".to_owned()),
                Some("hi".to_owned()),
            )
            .await
            .unwrap();

        h.processor.process_once().await.unwrap();
        let remaining = h.script().snapshot_remaining().await.unwrap();
        assert_eq!(remaining, "[Nova] keep me");
    }

    #[tokio::test]
    async fn rewrite_error_is_best_effort() {
        let mut h = Harness::new(StubSynth::ok("QUJD"), StubWriter::erroring());
        h.script()
            .replace("[Nova] keep me", AudioKind::General)
            .await
            .unwrap();
        let record = h
            .interrupts()
            .register(
                AudioKind::Superchat,
                Some("nova".to_owned()),
                Some("hi".to_owned()),
            )
            .await
            .unwrap();

        // The rewrite fails but the interrupt still reaches a terminal state.
        let outcome = h.processor.process_once().await.unwrap().unwrap();
        assert!(matches!(outcome, TickOutcome::Superchat { .. }));
        let loaded = h.interrupts().load(&record.interrupt_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InterruptStatus::Processed);
        assert_eq!(
            h.script().snapshot_remaining().await.unwrap(),
            "[Nova] keep me"
        );
    }

    #[tokio::test]
    async fn untagged_line_falls_back_to_entry_persona() {
        let synth = StubSynth::ok("QUJD");
        let mut h = Harness::new(synth.clone(), StubWriter::empty());
        h.script()
            .replace("no speaker tag here", AudioKind::General)
            .await
            .unwrap();

        let outcome = h.processor.process_once().await.unwrap().unwrap();
        let TickOutcome::ScriptLine { speaker, text, .. } = outcome else {
            panic!("expected script line");
        };
        assert_eq!(speaker, "nova");
        assert_eq!(text, "no speaker tag here");
    }

    #[tokio::test]
    async fn general_interrupt_record_is_rejected() {
        let mut h = Harness::new(StubSynth::ok("QUJD"), StubWriter::empty());

        // A general-kind record can only appear through store corruption;
        // craft one directly.
        let record = InterruptRecord {
            interrupt_id: "bad".to_owned(),
            kind: AudioKind::General,
            persona: None,
            message: None,
            status: InterruptStatus::Queued,
            created_at: unix_time(),
            started_at: None,
            completed_at: None,
            retry_at: None,
        };
        let kv = h.kv();
        kv.hash_set(
            "stream:interrupts:data",
            "bad",
            &serde_json::to_string(&record).unwrap(),
        )
        .await
        .unwrap();
        kv.push_tail("stream:interrupts:queue", "bad").await.unwrap();

        let err = h.processor.process_once().await.unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedInterruptKind(_)));
    }

    #[tokio::test]
    async fn reset_state_clears_queues_and_reloads_default_script() {
        let mut h = Harness::new(StubSynth::ok("QUJD"), StubWriter::empty());
        h.audio()
            .enqueue(AudioKind::General, "AAAA", "old", "nova")
            .await
            .unwrap();
        h.interrupts()
            .register(AudioKind::Gift, None, None)
            .await
            .unwrap();
        h.script().replace("[Nova] stale", AudioKind::Gift).await.unwrap();

        h.processor.reset_state().await.unwrap();

        assert_eq!(h.audio().count().await.unwrap(), 0);
        assert_eq!(h.interrupts().queue_len().await.unwrap(), 0);
        assert_eq!(h.history().len().await.unwrap(), 0);

        let default_lines = crate::config::DEFAULT_SCRIPT
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .count();
        assert_eq!(h.script().len().await.unwrap(), default_lines);
    }
}
