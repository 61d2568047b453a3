//! Capture and playback collaborators.
//!
//! The orchestrator drives both through narrow traits and never touches
//! device APIs itself: [`CaptureDevice`] is a push-to-talk microphone
//! (start, then stop to collect one buffer), [`PlaybackSink`] is a speaker
//! queue. Production implementations sit on CPAL and Rodio; scripted
//! doubles serve demos and tests.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{debug, info, warn};

use millbrook_core::error::{DialogueError, DialogueResult};

/// Mono PCM collected between one start and one stop command.
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    /// Samples (f32, -1.0..1.0), single channel.
    pub samples: Vec<f32>,
    /// Sample rate (e.g. 16000).
    pub sample_rate: u32,
    /// When the take was stopped.
    pub captured_at: DateTime<Utc>,
}

impl CapturedAudio {
    /// Whether the take holds no audio at all.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Approximate length of the take.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Microphone-side collaborator. Deliberately not `Send`: device streams
/// are not `Send` on some platforms, so the orchestrator stays on one task.
pub trait CaptureDevice {
    /// Begin a take. Flushes any previously accumulated samples.
    fn start(&mut self) -> DialogueResult<()>;
    /// End the take and hand back everything captured since `start`.
    fn stop(&mut self) -> DialogueResult<CapturedAudio>;
}

/// Speaker-side collaborator.
pub trait PlaybackSink {
    /// Queue one synthesized clip. Empty input is a no-op.
    fn play(&self, audio: &[u8]) -> DialogueResult<()>;
    /// Whether queued audio is still sounding.
    fn is_playing(&self) -> bool;
    /// Stop immediately and clear the queue.
    fn stop(&self);
}

/// CPAL-backed push-to-talk microphone. Requests 16 kHz mono from the
/// default input device; the stream only exists between start and stop.
pub struct Microphone {
    device: Device,
    stream_config: StreamConfig,
    sample_format: SampleFormat,
    sample_rate: u32,
    accumulator: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl Microphone {
    /// Resolve the default input device. Fails when the host has none.
    pub fn new() -> DialogueResult<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| DialogueError::Capture("no input device available".to_string()))?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let default_config = device
            .default_input_config()
            .map_err(|e| DialogueError::Capture(e.to_string()))?;
        let sample_format = default_config.sample_format();
        let sample_rate = 16_000;
        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        info!("Microphone: using '{name}' ({sample_rate} Hz mono)");
        Ok(Self {
            device,
            stream_config,
            sample_format,
            sample_rate,
            accumulator: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }
}

impl CaptureDevice for Microphone {
    fn start(&mut self) -> DialogueResult<()> {
        if self.stream.is_some() {
            debug!("Microphone: take already running");
            return Ok(());
        }
        if let Ok(mut buffer) = self.accumulator.lock() {
            buffer.clear();
        }
        let accumulator = Arc::clone(&self.accumulator);
        let err_fn = |e: cpal::StreamError| warn!("Microphone: stream error: {e}");
        let stream = match self.sample_format {
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &self.stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut buffer) = accumulator.lock() {
                            buffer.extend_from_slice(data);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| DialogueError::Capture(e.to_string()))?,
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &self.stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut buffer) = accumulator.lock() {
                            buffer.extend(data.iter().map(|&s| s as f32 / 32768.0));
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| DialogueError::Capture(e.to_string()))?,
            other => {
                return Err(DialogueError::Capture(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        };
        stream.play().map_err(|e| DialogueError::Capture(e.to_string()))?;
        self.stream = Some(stream);
        debug!("Microphone: take started");
        Ok(())
    }

    fn stop(&mut self) -> DialogueResult<CapturedAudio> {
        // Dropping the stream ends the callback before we drain the buffer.
        drop(self.stream.take());
        let samples = self
            .accumulator
            .lock()
            .map(|mut buffer| std::mem::take(&mut *buffer))
            .map_err(|_| DialogueError::Capture("capture buffer poisoned".to_string()))?;
        let take = CapturedAudio {
            samples,
            sample_rate: self.sample_rate,
            captured_at: Utc::now(),
        };
        debug!("Microphone: take stopped ({:.1}s)", take.duration_secs());
        Ok(take)
    }
}

/// Rodio-backed speaker queue on the default output device.
pub struct SpeakerSink {
    _stream: OutputStream,
    _stream_handle: OutputStreamHandle,
    sink: Sink,
}

impl SpeakerSink {
    pub fn new() -> DialogueResult<Self> {
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| DialogueError::Playback(e.to_string()))?;
        let sink =
            Sink::try_new(&stream_handle).map_err(|e| DialogueError::Playback(e.to_string()))?;
        info!("SpeakerSink: output ready");
        Ok(Self {
            _stream: stream,
            _stream_handle: stream_handle,
            sink,
        })
    }
}

impl PlaybackSink for SpeakerSink {
    fn play(&self, audio: &[u8]) -> DialogueResult<()> {
        if audio.is_empty() {
            debug!("SpeakerSink: empty clip, skipping");
            return Ok(());
        }
        let source = rodio::Decoder::new(Cursor::new(audio.to_vec()))
            .map_err(|e| DialogueError::Playback(format!("decode failed: {e}")))?;
        self.sink.append(source.convert_samples::<f32>());
        Ok(())
    }

    fn is_playing(&self) -> bool {
        !self.sink.empty()
    }

    fn stop(&self) {
        self.sink.stop();
    }
}

/// Scripted capture for demos and tests: each stop hands out the next
/// queued take, or silence once the queue runs dry.
pub struct ScriptedCapture {
    takes: VecDeque<Vec<f32>>,
    repeat: Option<Vec<f32>>,
    sample_rate: u32,
}

impl ScriptedCapture {
    /// Queue of takes, consumed one per stop.
    pub fn new(takes: Vec<Vec<f32>>) -> Self {
        Self {
            takes: takes.into(),
            repeat: None,
            sample_rate: 16_000,
        }
    }

    /// The same take for every stop, forever. Keeps a keyless demo talking.
    pub fn endless(samples: Vec<f32>) -> Self {
        Self {
            takes: VecDeque::new(),
            repeat: Some(samples),
            sample_rate: 16_000,
        }
    }
}

impl CaptureDevice for ScriptedCapture {
    fn start(&mut self) -> DialogueResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> DialogueResult<CapturedAudio> {
        let samples = self
            .takes
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or_default();
        Ok(CapturedAudio {
            samples,
            sample_rate: self.sample_rate,
            captured_at: Utc::now(),
        })
    }
}

/// Playback double: swallows clips, records their sizes, never "plays".
#[derive(Default)]
pub struct NullSink {
    clips: Arc<Mutex<Vec<usize>>>,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the sizes of played clips; grab it before boxing.
    pub fn clip_log(&self) -> Arc<Mutex<Vec<usize>>> {
        Arc::clone(&self.clips)
    }
}

impl PlaybackSink for NullSink {
    fn play(&self, audio: &[u8]) -> DialogueResult<()> {
        if audio.is_empty() {
            return Ok(());
        }
        if let Ok(mut clips) = self.clips.lock() {
            clips.push(audio.len());
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        false
    }

    fn stop(&self) {}
}
