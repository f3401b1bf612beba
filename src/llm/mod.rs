//! Script rewriting via the remote chat model.
//!
//! When an interrupt lands, the processor hands the LLM the stream history,
//! the remaining script, and the trigger, and swaps the script queue for
//! whatever comes back. Rewrites are best-effort: there is no retry, and a
//! failure leaves the current script in place.

use crate::api::{ApiPool, ChatMessage, ChatRequest};
use crate::catalog::PersonaCatalog;
use crate::config::LlmConfig;
use crate::error::{Result, StreamError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Rewrite requests are plain chat completions; give slow models headroom.
const REWRITE_TIMEOUT: Duration = Duration::from_secs(120);

const SYSTEM_PROMPT: &str = "You are the writers' room for a live AI streamer. \
You rewrite the remaining script of an ongoing stream in response to viewer \
events. Stay in character, keep continuity with what has already been said, \
and keep the energy of a live broadcast.";

/// Contract the stream processor holds for script rewriting.
#[async_trait]
pub trait ScriptWriter: Send + Sync {
    /// Produce a new remaining script.
    ///
    /// `history` is the rendered transcript so far, `trigger` the viewer
    /// event text, `remaining` the unspoken lines, and `sender` the superchat
    /// sender persona when there is one.
    async fn rewrite(
        &self,
        history: &str,
        trigger: &str,
        remaining: &str,
        sender: Option<&str>,
    ) -> Result<String>;
}

/// Production writer backed by the remote chat endpoint.
pub struct RemoteScriptWriter {
    pool: ApiPool,
    catalog: Arc<PersonaCatalog>,
    config: LlmConfig,
}

impl RemoteScriptWriter {
    /// Create a writer over the shared client pool.
    #[must_use]
    pub fn new(pool: ApiPool, catalog: Arc<PersonaCatalog>, config: LlmConfig) -> Self {
        Self {
            pool,
            catalog,
            config,
        }
    }

    fn build_prompt(
        &self,
        history: &str,
        trigger: &str,
        remaining: &str,
        sender: Option<&str>,
    ) -> Result<String> {
        let streamer = self.catalog.default_persona();
        let scene = self.catalog.resolve(streamer)?.scene.clone();

        let event = match sender {
            Some(sender) => format!("Superchat from {sender}: {trigger}"),
            None => trigger.to_owned(),
        };

        Ok(format!(
            "The streamer \"{streamer}\" is live. Their voice and character:\n\
             {scene}\n\n\
             What has been said on stream so far:\n{history}\n\
             The remaining scripted lines, which you may rewrite:\n{remaining}\n\n\
             A viewer event just happened: {event}\n\n\
             React to the event, then carry the stream forward. Output only the \
             new remaining script, one line per utterance, each line prefixed \
             with the speaker tag in square brackets, e.g. [{streamer}]."
        ))
    }
}

#[async_trait]
impl ScriptWriter for RemoteScriptWriter {
    async fn rewrite(
        &self,
        history: &str,
        trigger: &str,
        remaining: &str,
        sender: Option<&str>,
    ) -> Result<String> {
        let prompt = self.build_prompt(history, trigger, remaining, sender)?;

        let mut request = ChatRequest::new(
            &self.config.model,
            vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(&prompt)],
        );
        request.max_tokens = Some(4096);
        request.temperature = Some(0.7);

        let response = self
            .pool
            .get()
            .chat(&request, REWRITE_TIMEOUT)
            .await
            .map_err(|e| StreamError::Llm(e.to_string()))?;

        let script = response
            .first_text()
            .ok_or_else(|| StreamError::Llm("rewrite response had no content".to_owned()))?;
        Ok(script.to_owned())
    }
}
