//! The turn loop: push-to-talk in, character speech out.
//!
//! `TurnOrchestrator` owns the conversation and walks each turn through
//! record, transcribe, complete, synthesize, and play, strictly one stage at
//! a time. There is no queueing and no concurrency; while a turn is in
//! flight every other request is refused. Observers follow along through a
//! `watch` channel of `DialogueSnapshot`s.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use millbrook_core::{
    CharacterRegistry, CompletionBackend, Conversation, DialogueError, DialogueResult, Message,
};

use crate::audio::{CaptureDevice, CapturedAudio, PlaybackSink};
use crate::synthesize::SynthesisBackend;
use crate::transcribe::TranscriptionBackend;

/// Line spoken in character when a turn dies after the player was heard.
pub const APOLOGY_LINE: &str =
    "Ah, sorry friend, seems my mind's a bit fuzzy right now. Try me again in a moment.";

/// How often playback is polled for completion.
const PLAYBACK_POLL: Duration = Duration::from_millis(40);

/// Where the loop currently is. Variants are ordered by progress through a
/// turn, so `phase >= Phase::AwaitingCompletion` means the player's line has
/// already been committed to the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Recording,
    Transcribing,
    AwaitingCompletion,
    Synthesizing,
    Playing,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Recording => "recording",
            Phase::Transcribing => "transcribing",
            Phase::AwaitingCompletion => "awaiting_completion",
            Phase::Synthesizing => "synthesizing",
            Phase::Playing => "playing",
        }
    }
}

/// Point-in-time view of the dialogue, published on every change.
#[derive(Debug, Clone, Serialize)]
pub struct DialogueSnapshot {
    pub phase: Phase,
    pub active_character_id: String,
    pub messages: Vec<Message>,
}

/// Drives the record/transcribe/complete/synthesize/play loop for one
/// conversation at a time.
pub struct TurnOrchestrator {
    registry: CharacterRegistry,
    conversation: Conversation,
    phase: Phase,
    capture: Box<dyn CaptureDevice>,
    transcriber: Box<dyn TranscriptionBackend>,
    completion: Box<dyn CompletionBackend>,
    synthesizer: Box<dyn SynthesisBackend>,
    playback: Box<dyn PlaybackSink>,
    snapshot_tx: watch::Sender<DialogueSnapshot>,
}

impl TurnOrchestrator {
    /// Wire up a loop around the roster's first character. The conversation
    /// opens with that character's greeting already on the transcript.
    pub fn new(
        registry: CharacterRegistry,
        capture: Box<dyn CaptureDevice>,
        transcriber: Box<dyn TranscriptionBackend>,
        completion: Box<dyn CompletionBackend>,
        synthesizer: Box<dyn SynthesisBackend>,
        playback: Box<dyn PlaybackSink>,
    ) -> Self {
        let host = registry.default_character();
        info!("Orchestrator: ready, {} opens the conversation", host.display_name);
        let conversation = Conversation::start_with(host);
        let (snapshot_tx, _) = watch::channel(DialogueSnapshot {
            phase: Phase::Idle,
            active_character_id: conversation.active_character_id().to_string(),
            messages: conversation.messages().to_vec(),
        });
        Self {
            registry,
            conversation,
            phase: Phase::Idle,
            capture,
            transcriber,
            completion,
            synthesizer,
            playback,
            snapshot_tx,
        }
    }

    /// Begin capturing the player's next line. Returns `Ok(false)` when
    /// already recording or when a turn is still in flight.
    pub fn start_recording(&mut self) -> DialogueResult<bool> {
        match self.phase {
            Phase::Recording => Ok(false),
            Phase::Idle => {
                self.capture.start()?;
                self.set_phase(Phase::Recording);
                Ok(true)
            }
            _ => {
                warn!("Orchestrator: can't record while {}", self.phase.as_str());
                Ok(false)
            }
        }
    }

    /// Stop capturing and run the turn to the end. Returns `Ok(false)` when
    /// nothing was being recorded. Provider failures do not surface here;
    /// they are absorbed into the transcript as an in-character apology.
    pub async fn stop_recording(&mut self) -> DialogueResult<bool> {
        if self.phase != Phase::Recording {
            return Ok(false);
        }
        self.set_phase(Phase::Transcribing);
        let audio = match self.capture.stop() {
            Ok(audio) => audio,
            Err(e) => {
                self.abort_turn(e);
                return Ok(true);
            }
        };
        if audio.is_empty() {
            debug!("Orchestrator: empty take, nothing to transcribe");
            self.set_phase(Phase::Idle);
            return Ok(true);
        }
        if let Err(e) = self.run_turn(&audio).await {
            self.abort_turn(e);
        }
        Ok(true)
    }

    async fn run_turn(&mut self, audio: &CapturedAudio) -> DialogueResult<()> {
        let transcript = self.transcriber.transcribe(audio).await?;
        let spoken = transcript.trim();
        if spoken.is_empty() {
            debug!("Orchestrator: heard nothing usable, back to idle");
            self.set_phase(Phase::Idle);
            return Ok(());
        }
        info!("Orchestrator: heard \"{spoken}\"");

        // History for the model stops before the line being answered.
        let history = self.conversation.messages().to_vec();
        self.conversation.push_user(spoken);
        self.set_phase(Phase::AwaitingCompletion);

        let character = self
            .registry
            .get(self.conversation.active_character_id())
            .cloned()
            .ok_or_else(|| {
                DialogueError::InvalidArgument(format!(
                    "active character {} is not in the roster",
                    self.conversation.active_character_id()
                ))
            })?;

        let reply = self
            .completion
            .complete(
                &character,
                self.conversation.system_prompt(),
                &history,
                spoken,
            )
            .await?;
        self.conversation.push_assistant(&character, &reply.reply);
        if let Some(delta) = &reply.prompt_delta {
            self.conversation.apply_prompt_delta(delta);
        }

        self.set_phase(Phase::Synthesizing);
        let clip = self
            .synthesizer
            .synthesize(&reply.reply, &character.voice_id)
            .await?;
        self.play_clip(&clip).await
    }

    async fn play_clip(&mut self, clip: &[u8]) -> DialogueResult<()> {
        self.set_phase(Phase::Playing);
        self.playback.play(clip)?;
        while self.playback.is_playing() {
            tokio::time::sleep(PLAYBACK_POLL).await;
        }
        self.set_phase(Phase::Idle);
        Ok(())
    }

    /// Failure recovery: apologize in character if the player's line already
    /// made it onto the transcript, then fall back to Idle for the next turn.
    fn abort_turn(&mut self, error: DialogueError) {
        warn!(
            "Orchestrator: turn failed while {}: {error}",
            self.phase.as_str()
        );
        if self.phase >= Phase::AwaitingCompletion {
            if let Some(character) = self.registry.get(self.conversation.active_character_id()) {
                self.conversation.push_assistant(character, APOLOGY_LINE);
            }
        }
        self.set_phase(Phase::Idle);
    }

    /// Hand the conversation to another roster character. Only honored while
    /// Idle; the transcript resets to the newcomer's greeting and their base
    /// prompt, dropping anything the previous conversation had accrued.
    pub fn switch_character(&mut self, character_id: &str) -> DialogueResult<bool> {
        if self.phase != Phase::Idle {
            warn!(
                "Orchestrator: ignoring switch to {character_id} while {}",
                self.phase.as_str()
            );
            return Ok(false);
        }
        if character_id == self.conversation.active_character_id() {
            debug!("Orchestrator: {character_id} is already speaking");
            return Ok(false);
        }
        let character = self.registry.get(character_id).ok_or_else(|| {
            DialogueError::InvalidArgument(format!("unknown character: {character_id}"))
        })?;
        info!("Orchestrator: {} takes over", character.display_name);
        self.conversation.reset_for(character);
        self.publish();
        Ok(true)
    }

    /// Speak the most recent character line again, in the voice of whoever
    /// said it. The transcript is untouched and a failure here stays silent;
    /// no apology is appended for a replay.
    pub async fn replay_last(&mut self) -> DialogueResult<bool> {
        if self.phase != Phase::Idle {
            warn!("Orchestrator: ignoring replay while {}", self.phase.as_str());
            return Ok(false);
        }
        let Some(last) = self.conversation.last_assistant().cloned() else {
            debug!("Orchestrator: nothing said yet, nothing to replay");
            return Ok(false);
        };
        let Some(voice_id) = self
            .registry
            .get(&last.character_id)
            .map(|c| c.voice_id.clone())
        else {
            debug!(
                "Orchestrator: {} left the roster, can't replay",
                last.character_id
            );
            return Ok(false);
        };
        self.set_phase(Phase::Synthesizing);
        if let Err(e) = self.run_replay(&last.content, &voice_id).await {
            warn!("Orchestrator: replay failed: {e}");
            self.set_phase(Phase::Idle);
        }
        Ok(true)
    }

    async fn run_replay(&mut self, text: &str, voice_id: &str) -> DialogueResult<()> {
        let clip = self.synthesizer.synthesize(text, voice_id).await?;
        self.play_clip(&clip).await
    }

    /// True while a synthesized clip is audible.
    pub fn is_speaking(&self) -> bool {
        self.phase == Phase::Playing
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The dialogue as last published.
    pub fn snapshot(&self) -> DialogueSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Follow the dialogue from outside the loop (UIs, tests).
    pub fn subscribe(&self) -> watch::Receiver<DialogueSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn system_prompt(&self) -> &str {
        self.conversation.system_prompt()
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase == phase {
            return;
        }
        debug!("Orchestrator: {} -> {}", self.phase.as_str(), phase.as_str());
        self.phase = phase;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(DialogueSnapshot {
            phase: self.phase,
            active_character_id: self.conversation.active_character_id().to_string(),
            messages: self.conversation.messages().to_vec(),
        });
    }
}
