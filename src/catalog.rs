//! Persona reference catalog.
//!
//! Maps persona IDs to the material needed to condition the TTS endpoint:
//! a canonical reference clip, its transcript, and a scene description.
//! Loaded once at boot; missing reference audio fails startup.

use crate::config::AppConfig;
use crate::error::{Result, StreamError};
use std::collections::HashMap;
use std::sync::Arc;

/// Reference material for one voice identity.
#[derive(Debug, Clone)]
pub struct PersonaReference {
    /// Normalized catalog key (lowercase, underscores).
    pub key: String,
    /// Reference clip bytes, sent inline with every synthesis request.
    pub audio: Vec<u8>,
    /// Container format of the reference clip (file extension, e.g. `wav`).
    pub format: String,
    /// Transcript of the reference clip.
    pub transcript: String,
    /// Scene description embedded in the synthesis system prompt.
    pub scene: String,
}

/// Built-in persona manifest: (key, reference file name, transcript, scene).
const BUILTIN_PERSONAS: &[(&str, &str, &str, &str)] = &[
    (
        "nova",
        "nova_voice.wav",
        "Okay chat, real talk, I have been grinding this boss for three hours \
         and I refuse, I absolutely refuse, to lower the difficulty. We are \
         locked in tonight. Somebody clip that last attempt, that was robbery.",
        "A high-energy streamer in her twenties, fast-paced and playful, \
         frequently addressing the chat directly. Bright room tone, close mic.",
    ),
    (
        "baron",
        "baron_voice.wav",
        "Ladies and gentlemen, welcome back to the broadcast. Tonight we have \
         an absolutely stacked lineup, and I will be walking you through every \
         minute of it in unnecessary detail, as is tradition.",
        "A deep-voiced veteran commentator, theatrical and deliberate, with \
         long dramatic pauses. Studio acoustics, slight reverb.",
    ),
    (
        "pixel",
        "pixel_voice.wav",
        "Hiii everyone! Oh my gosh, the gifts today, you are all way too nice \
         to me. Okay okay okay, focus. One more round, and this time I am \
         actually going to read the quest text. Probably.",
        "A cheerful, giggly variety streamer with a bright, slightly squeaky \
         voice and quick delivery. Bedroom-setup acoustics.",
    ),
];

/// Read-only persona catalog, loaded at startup.
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    personas: HashMap<String, Arc<PersonaReference>>,
    default_persona: String,
}

impl PersonaCatalog {
    /// Load the built-in manifest, reading reference audio eagerly.
    ///
    /// # Errors
    ///
    /// Returns an error if any reference clip cannot be read, or if the
    /// configured default persona is not in the manifest.
    pub fn load(config: &AppConfig) -> Result<Self> {
        let audio_dir = config.reference_audio_dir();
        let mut entries = Vec::with_capacity(BUILTIN_PERSONAS.len());

        for (key, file, transcript, scene) in BUILTIN_PERSONAS {
            let path = audio_dir.join(file);
            let audio = std::fs::read(&path).map_err(|e| {
                StreamError::Config(format!(
                    "reference audio for persona '{key}' not readable ({}): {e}",
                    path.display()
                ))
            })?;
            let format = path
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("wav")
                .to_owned();
            entries.push(PersonaReference {
                key: (*key).to_owned(),
                audio,
                format,
                transcript: transcript.trim().to_owned(),
                scene: (*scene).to_owned(),
            });
        }

        Self::from_entries(entries, &config.stream.default_persona)
    }

    /// Build a catalog from explicit entries (used by tests and tools).
    ///
    /// # Errors
    ///
    /// Returns an error if `default_persona` does not match any entry.
    pub fn from_entries(
        entries: impl IntoIterator<Item = PersonaReference>,
        default_persona: &str,
    ) -> Result<Self> {
        let default_persona = normalize_key(default_persona);
        let personas: HashMap<String, Arc<PersonaReference>> = entries
            .into_iter()
            .map(|p| (p.key.clone(), Arc::new(p)))
            .collect();

        if !personas.contains_key(&default_persona) {
            return Err(StreamError::Config(format!(
                "default streamer persona '{default_persona}' is not in the catalog"
            )));
        }

        Ok(Self {
            personas,
            default_persona,
        })
    }

    /// Resolve a persona by name, falling back to the default streamer.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownPersona`] only if the fallback itself is
    /// missing, which `load`/`from_entries` rule out.
    pub fn resolve(&self, persona: &str) -> Result<Arc<PersonaReference>> {
        let key = normalize_key(persona);
        if let Some(reference) = self.personas.get(&key) {
            return Ok(Arc::clone(reference));
        }
        self.personas
            .get(&self.default_persona)
            .map(Arc::clone)
            .ok_or_else(|| StreamError::UnknownPersona(persona.to_owned()))
    }

    /// The configured default streamer persona key.
    #[must_use]
    pub fn default_persona(&self) -> &str {
        &self.default_persona
    }
}

/// Normalize a persona name into a catalog key: lowercase, spaces to
/// underscores.
#[must_use]
pub fn normalize_key(persona: &str) -> String {
    persona.trim().to_lowercase().replace(' ', "_")
}
