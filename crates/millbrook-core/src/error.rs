//! Error types shared by every stage of a spoken turn.

use thiserror::Error;

/// Result type alias for dialogue operations.
pub type DialogueResult<T> = Result<T, DialogueError>;

/// Errors that can occur while driving a spoken turn.
///
/// Every variant is scoped to a single turn: the orchestrator catches them at
/// its boundary, lands back in `Idle`, and the session continues.
#[derive(Error, Debug)]
pub enum DialogueError {
    /// Caller bug (blank text, blank voice id, unknown character). Surfaced,
    /// never silently ignored.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A zero-length capture buffer was submitted for transcription.
    #[error("Empty audio input")]
    EmptyInput,

    /// A remote provider answered with a non-success status.
    #[error("Provider error (HTTP {status}): {detail}")]
    Provider { status: u16, detail: String },

    /// Completion output did not match the two-field reply shape.
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// Speech synthesis failed past the single default-voice fallback.
    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Transport-level HTTP failure; no status code ever arrived.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
