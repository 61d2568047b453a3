//! # Millbrook Core — Dialogue Domain
//!
//! Everything that is true about a village conversation regardless of audio
//! plumbing: the character roster, the append-only transcript with its
//! evolving system prompt, the structured completion contract, and the
//! error taxonomy shared across the workspace.
//!
//! The audio edge (capture, transcription, synthesis, playback, and the
//! turn orchestrator) lives in `millbrook-voice`.

pub mod character;
pub mod completion;
pub mod conversation;
pub mod error;

pub use character::{Character, CharacterRegistry, DEFAULT_VOICE_ID};
pub use completion::{
    CompletionBackend, CompletionReply, GenerationParams, OpenAiCompletion,
    RecordedCompletionCall, ScriptedCompletion, HISTORY_WINDOW,
};
pub use conversation::{Conversation, Message, Role, USER_ID, USER_NAME};
pub use error::{DialogueError, DialogueResult};
