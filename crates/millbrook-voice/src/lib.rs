//! # Millbrook Voice - Spoken NPC Turn Loop
//!
//! Push-to-talk conversation with the villagers of Millbrook: capture a line
//! from the microphone, transcribe it, ask the active character for an
//! answer, then speak that answer out loud. One turn at a time, nothing
//! overlapping.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Turn Orchestrator                       │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐            │
//! │  │ Microphone │ → │ ElevenLabs │ → │ Completion │            │
//! │  │   (cpal)   │   │    STT     │   │  (OpenAI)  │            │
//! │  └────────────┘   └────────────┘   └─────┬──────┘            │
//! │                                          ↓                   │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐            │
//! │  │  Speaker   │ ← │ ElevenLabs │ ← │ transcript │            │
//! │  │  (rodio)   │   │    TTS     │   │  + prompt  │            │
//! │  └────────────┘   └────────────┘   └────────────┘            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

/// Base URL for the public ElevenLabs API.
pub(crate) const ELEVENLABS_API_BASE: &str = "https://api.elevenlabs.io";

pub mod audio;
pub mod orchestrator;
pub mod synthesize;
pub mod transcribe;

pub use audio::{
    CaptureDevice, CapturedAudio, Microphone, NullSink, PlaybackSink, ScriptedCapture, SpeakerSink,
};
pub use orchestrator::{DialogueSnapshot, Phase, TurnOrchestrator, APOLOGY_LINE};
pub use synthesize::{
    ElevenLabsTts, ScriptedTts, SynthesisBackend, VoiceSettings, DEFAULT_TTS_MODEL,
};
pub use transcribe::{ElevenLabsStt, ScriptedStt, TranscriptionBackend, DEFAULT_STT_MODEL};
