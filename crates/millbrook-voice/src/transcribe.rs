//! Speech-to-text gateway: ship a recorded take to ElevenLabs and get words back.
//!
//! `TranscriptionBackend` is the seam the orchestrator talks through. `ElevenLabsStt`
//! does the real multipart upload; `ScriptedStt` stands in when there is no API key.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use millbrook_core::{DialogueError, DialogueResult};

use crate::audio::CapturedAudio;
use crate::ELEVENLABS_API_BASE;

/// Default ElevenLabs transcription model.
pub const DEFAULT_STT_MODEL: &str = "scribe_v1";

/// Turns captured PCM into text.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Transcribe one take. A take with no samples at all is refused with
    /// `EmptyInput`; a take of pure silence comes back as an empty or
    /// whitespace-only string and is the caller's problem.
    async fn transcribe(&self, audio: &CapturedAudio) -> DialogueResult<String>;
}

/// Encode mono f32 PCM as 16-bit WAV bytes for upload.
fn wav_from_pcm(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32; // 16-bit = 2 bytes per sample
    let mut buf = Vec::with_capacity(44 + data_len as usize);
    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&i.to_le_bytes());
    }
    buf
}

/// The transcription endpoint answers `{"text": ...}`; older deployments
/// used `{"transcript": ...}`. Accept either.
#[derive(Debug, Deserialize)]
struct TranscriptBody {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
}

/// ElevenLabs speech-to-text over a multipart POST.
#[derive(Debug, Clone)]
pub struct ElevenLabsStt {
    base_url: String,
    api_key: String,
    model_id: String,
    client: reqwest::Client,
}

impl ElevenLabsStt {
    /// Build from environment: `ELEVENLABS_API_KEY` (required) plus an optional
    /// `ELEVENLABS_API_URL` override.
    pub fn from_env() -> DialogueResult<Self> {
        let api_key = std::env::var("ELEVENLABS_API_KEY").map_err(|_| {
            DialogueError::Config("transcription requires ELEVENLABS_API_KEY".to_string())
        })?;
        let stt = match std::env::var("ELEVENLABS_API_URL") {
            Ok(url) => Self::new(api_key)?.with_base_url(url),
            Err(_) => Self::new(api_key)?,
        };
        Ok(stt)
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
            model_id: DEFAULT_STT_MODEL.to_string(),
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
}

#[async_trait]
impl TranscriptionBackend for ElevenLabsStt {
    async fn transcribe(&self, audio: &CapturedAudio) -> DialogueResult<String> {
        if audio.is_empty() {
            return Err(DialogueError::EmptyInput);
        }
        let wav = wav_from_pcm(&audio.samples, audio.sample_rate);
        debug!(
            "Transcription: uploading {:.1}s take ({} WAV bytes)",
            audio.duration_secs(),
            wav.len()
        );
        let url = format!("{}/v1/speech-to-text", self.base_url.trim_end_matches('/'));
        let part = Part::bytes(wav)
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .map_err(|e| DialogueError::InvalidArgument(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("model_id", self.model_id.clone());
        let res = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            let detail = res.text().await.unwrap_or_default();
            return Err(DialogueError::Provider {
                status: status.as_u16(),
                detail,
            });
        }
        let body: TranscriptBody = res.json().await.map_err(|e| DialogueError::Provider {
            status: status.as_u16(),
            detail: format!("undecodable transcription body: {e}"),
        })?;
        Ok(body.text.or(body.transcript).unwrap_or_default())
    }
}

/// Canned transcription for offline runs and tests. Honors the empty-take contract.
#[derive(Debug, Clone)]
pub struct ScriptedStt {
    /// Returned for every non-empty take.
    pub transcript: String,
}

impl ScriptedStt {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
        }
    }
}

impl Default for ScriptedStt {
    fn default() -> Self {
        Self::new("Tell me about the woods.")
    }
}

#[async_trait]
impl TranscriptionBackend for ScriptedStt {
    async fn transcribe(&self, audio: &CapturedAudio) -> DialogueResult<String> {
        if audio.is_empty() {
            return Err(DialogueError::EmptyInput);
        }
        Ok(self.transcript.clone())
    }
}
