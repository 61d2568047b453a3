//! Text-to-speech gateway: turn a finished reply into MP3 bytes via ElevenLabs.
//!
//! One fallback rule lives here: if the requested voice comes back 404, retry
//! exactly once with the stock default voice. Every other failure is terminal.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

use millbrook_core::{DialogueError, DialogueResult, DEFAULT_VOICE_ID};

use crate::ELEVENLABS_API_BASE;

/// Default ElevenLabs speech model.
pub const DEFAULT_TTS_MODEL: &str = "eleven_monolingual_v1";

/// Delivery tuning sent with every synthesis request.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.8,
            style: 0.2,
            use_speaker_boost: true,
        }
    }
}

/// Turns reply text into playable audio bytes for a given voice.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Synthesize `text` in the voice `voice_id`. Blank text or a blank voice id
    /// is refused with `InvalidArgument` before any request goes out.
    async fn synthesize(&self, text: &str, voice_id: &str) -> DialogueResult<Vec<u8>>;
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

/// How a single speech request went wrong. Only the 404 case is retryable,
/// and only once; `into_terminal` collapses the rest.
enum SpeechFailure {
    VoiceNotFound,
    Status { status: u16, detail: String },
    Transport(reqwest::Error),
}

impl SpeechFailure {
    fn into_terminal(self) -> DialogueError {
        match self {
            SpeechFailure::VoiceNotFound => {
                DialogueError::SynthesisFailed("voice not found (HTTP 404)".to_string())
            }
            SpeechFailure::Status { status, detail } => {
                DialogueError::SynthesisFailed(format!("speech API error {status}: {detail}"))
            }
            SpeechFailure::Transport(e) => DialogueError::SynthesisFailed(e.to_string()),
        }
    }
}

/// ElevenLabs text-to-speech over HTTPS.
#[derive(Debug, Clone)]
pub struct ElevenLabsTts {
    base_url: String,
    api_key: String,
    model_id: String,
    fallback_voice_id: String,
    settings: VoiceSettings,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    /// Build from environment: `ELEVENLABS_API_KEY` (required) plus an optional
    /// `ELEVENLABS_API_URL` override.
    pub fn from_env() -> DialogueResult<Self> {
        let api_key = std::env::var("ELEVENLABS_API_KEY").map_err(|_| {
            DialogueError::Config("synthesis requires ELEVENLABS_API_KEY".to_string())
        })?;
        let tts = match std::env::var("ELEVENLABS_API_URL") {
            Ok(url) => Self::new(api_key)?.with_base_url(url),
            Err(_) => Self::new(api_key)?,
        };
        Ok(tts)
    }

    /// Create with an explicit API key against the public ElevenLabs endpoint.
    pub fn new(api_key: impl Into<String>) -> DialogueResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| DialogueError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: ELEVENLABS_API_BASE.to_string(),
            api_key: api_key.into(),
            model_id: DEFAULT_TTS_MODEL.to_string(),
            fallback_voice_id: DEFAULT_VOICE_ID.to_string(),
            settings: VoiceSettings::default(),
            client,
        })
    }

    /// Point at a different server (proxies, test fixtures).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Override the voice used for the one 404 retry.
    pub fn with_fallback_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.fallback_voice_id = voice_id.into();
        self
    }

    async fn request_speech(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, SpeechFailure> {
        let url = format!(
            "{}/v1/text-to-speech/{voice_id}",
            self.base_url.trim_end_matches('/')
        );
        let body = SpeechRequest {
            text,
            model_id: &self.model_id,
            voice_settings: &self.settings,
        };
        let res = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header(ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(SpeechFailure::Transport)?;
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SpeechFailure::VoiceNotFound);
        }
        if !status.is_success() {
            let detail = res.text().await.unwrap_or_default();
            return Err(SpeechFailure::Status {
                status: status.as_u16(),
                detail,
            });
        }
        let bytes = res.bytes().await.map_err(SpeechFailure::Transport)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SynthesisBackend for ElevenLabsTts {
    async fn synthesize(&self, text: &str, voice_id: &str) -> DialogueResult<Vec<u8>> {
        if text.trim().is_empty() {
            return Err(DialogueError::InvalidArgument(
                "synthesis text is empty".to_string(),
            ));
        }
        if voice_id.trim().is_empty() {
            return Err(DialogueError::InvalidArgument(
                "synthesis voice id is empty".to_string(),
            ));
        }
        match self.request_speech(text, voice_id).await {
            Ok(bytes) => Ok(bytes),
            Err(SpeechFailure::VoiceNotFound) if voice_id != self.fallback_voice_id => {
                warn!(
                    "Synthesis: voice {voice_id} not found, retrying with fallback {}",
                    self.fallback_voice_id
                );
                self.request_speech(text, &self.fallback_voice_id)
                    .await
                    .map_err(SpeechFailure::into_terminal)
            }
            Err(failure) => Err(failure.into_terminal()),
        }
    }
}

/// Canned synthesis: returns a fixed clip and records which voice was asked for.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTts {
    voices: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle onto the voices requested so far, in order.
    pub fn voice_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.voices)
    }
}

#[async_trait]
impl SynthesisBackend for ScriptedTts {
    async fn synthesize(&self, text: &str, voice_id: &str) -> DialogueResult<Vec<u8>> {
        if text.trim().is_empty() {
            return Err(DialogueError::InvalidArgument(
                "synthesis text is empty".to_string(),
            ));
        }
        if voice_id.trim().is_empty() {
            return Err(DialogueError::InvalidArgument(
                "synthesis voice id is empty".to_string(),
            ));
        }
        if let Ok(mut log) = self.voices.lock() {
            log.push(voice_id.to_string());
        }
        Ok(vec![1, 2, 3, 4])
    }
}
