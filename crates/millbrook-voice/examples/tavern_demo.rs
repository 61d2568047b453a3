//! Tavern demo — talk to the villagers of Millbrook from a terminal.
//!
//! Controls (type a line, press Enter):
//! - empty line: start recording; another empty line stops and runs the turn
//! - `switch <id>`: hand the conversation to another character (idle only)
//! - `replay`: speak the last character line again
//! - `quit`: leave the tavern
//!
//! With `ELEVENLABS_API_KEY` and `OPENAI_API_KEY` set (e.g. in `.env`) the
//! demo records from the default microphone and speaks through the default
//! output device. Without them it falls back to scripted backends so the
//! loop can still be exercised end to end.

use millbrook_core::{CharacterRegistry, CompletionBackend, OpenAiCompletion, ScriptedCompletion};
use millbrook_voice::{
    CaptureDevice, ElevenLabsStt, ElevenLabsTts, Microphone, NullSink, Phase, PlaybackSink,
    ScriptedCapture, ScriptedStt, ScriptedTts, SpeakerSink, SynthesisBackend,
    TranscriptionBackend, TurnOrchestrator,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Millbrook tavern demo — Enter to talk, Enter again to send.");
    info!("Commands: switch <id>, replay, quit.");

    let registry = CharacterRegistry::from_env();
    let roster = registry
        .characters()
        .iter()
        .map(|c| c.id.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    info!("In the room: {roster}");

    let capture: Box<dyn CaptureDevice> = match Microphone::new() {
        Ok(mic) => Box::new(mic),
        Err(e) => {
            warn!("No microphone ({e}); using a scripted take instead.");
            Box::new(ScriptedCapture::endless(vec![0.05; 16_000]))
        }
    };
    let playback: Box<dyn PlaybackSink> = match SpeakerSink::new() {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            warn!("No output device ({e}); replies will not be audible.");
            Box::new(NullSink::new())
        }
    };
    let transcriber: Box<dyn TranscriptionBackend> = match ElevenLabsStt::from_env() {
        Ok(stt) => Box::new(stt),
        Err(e) => {
            warn!("{e}; transcription is scripted.");
            Box::new(ScriptedStt::default())
        }
    };
    let synthesizer: Box<dyn SynthesisBackend> = match ElevenLabsTts::from_env() {
        Ok(tts) => Box::new(tts),
        Err(e) => {
            warn!("{e}; synthesis is scripted.");
            Box::new(ScriptedTts::new())
        }
    };
    let completion: Box<dyn CompletionBackend> = match OpenAiCompletion::from_env() {
        Ok(c) => Box::new(c),
        Err(e) => {
            warn!("{e}; replies are scripted.");
            Box::new(ScriptedCompletion::default())
        }
    };

    let mut orchestrator = TurnOrchestrator::new(
        registry,
        capture,
        transcriber,
        completion,
        synthesizer,
        playback,
    );
    print_tail(&orchestrator, 1);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {
                if orchestrator.phase() == Phase::Recording {
                    orchestrator.stop_recording().await?;
                    print_tail(&orchestrator, 2);
                } else if orchestrator.start_recording()? {
                    info!("Recording... press Enter again to send.");
                }
            }
            "replay" => {
                if !orchestrator.replay_last().await? {
                    info!("Nothing to replay yet.");
                }
            }
            "quit" | "exit" => break,
            other => {
                if let Some(id) = other.strip_prefix("switch ") {
                    match orchestrator.switch_character(id.trim()) {
                        Ok(true) => print_tail(&orchestrator, 1),
                        Ok(false) => info!("Switch ignored."),
                        Err(e) => warn!("{e}"),
                    }
                } else {
                    info!("Commands: Enter (talk), switch <id>, replay, quit.");
                }
            }
        }
    }

    info!("Leaving the tavern.");
    Ok(())
}

/// Print the last `count` transcript lines.
fn print_tail(orchestrator: &TurnOrchestrator, count: usize) {
    let snapshot = orchestrator.snapshot();
    let skip = snapshot.messages.len().saturating_sub(count);
    for message in &snapshot.messages[skip..] {
        info!("{}: {}", message.character_name, message.content);
    }
}
