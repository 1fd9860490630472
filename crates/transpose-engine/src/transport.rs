//! Playback transport: the source end of the signal graph.
//!
//! The orchestrator drives any [`Transport`]. [`PcmTransport`] is the in-memory
//! implementation used by the CLI and tests: it plays decoded [`PcmClip`]s that
//! the host registers under a URL, and supports native variable-speed playback
//! (pitch follows speed) for the degraded tempo path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::block::{AudioBlock, BlockSource, StreamFormat};
use crate::dsp::interp::lerp;
use crate::error::TransportError;

pub const MIN_PLAYBACK_RATE: f32 = 0.25;
pub const MAX_PLAYBACK_RATE: f32 = 4.0;

/// Media-element style transport controls.
pub trait Transport {
    fn load(&mut self, url: &str) -> Result<(), TransportError>;
    fn play(&mut self) -> Result<(), TransportError>;
    fn pause(&mut self) -> Result<(), TransportError>;
    fn seek(&mut self, seconds: f64) -> Result<(), TransportError>;
    /// Native variable-speed playback. Changes pitch along with tempo.
    fn set_playback_rate(&mut self, rate: f32) -> Result<(), TransportError>;
    fn playback_rate(&self) -> f32;
    /// Current position in the loaded clip, in seconds.
    fn current_time(&self) -> f64;
    fn duration(&self) -> Option<f64>;
    fn is_playing(&self) -> bool;
}

/// Decoded interleaved PCM, cheap to clone.
#[derive(Debug, Clone)]
pub struct PcmClip {
    sample_rate: u32,
    channels: usize,
    frames: usize,
    samples: Arc<[f32]>,
}

impl PcmClip {
    pub fn from_interleaved(sample_rate: u32, channels: usize, samples: Vec<f32>) -> Result<Self, TransportError> {
        if channels == 0 || samples.len() % channels != 0 {
            return Err(TransportError::RaggedClip { samples: samples.len(), channels });
        }
        Ok(Self { sample_rate, channels, frames: samples.len() / channels, samples: samples.into() })
    }

    /// Sine test tone, the same on every channel.
    pub fn tone(sample_rate: u32, channels: usize, hz: f32, seconds: f32, amplitude: f32) -> Self {
        let frames = (sample_rate as f32 * seconds) as usize;
        let channels = channels.max(1);
        let mut samples = Vec::with_capacity(frames * channels);
        for n in 0..frames {
            let v = (2.0 * std::f64::consts::PI * hz as f64 * n as f64 / sample_rate as f64).sin() as f32 * amplitude;
            samples.extend(std::iter::repeat(v).take(channels));
        }
        Self { sample_rate, channels, frames, samples: samples.into() }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn duration(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    /// Sample at `frame` for output channel `ch`; channels wrap, so mono fans out.
    #[inline]
    pub fn sample(&self, frame: usize, ch: usize) -> f32 {
        if frame >= self.frames {
            return 0.0;
        }
        self.samples[frame * self.channels + ch % self.channels]
    }
}

enum TransportCommand {
    Load(PcmClip),
    Play,
    Pause,
    Seek(f64),
    Rate(f32),
}

/// Written by the render side, read by the control side.
struct TransportStatus {
    position: AtomicU64,
    playing: AtomicBool,
}

impl TransportStatus {
    fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Acquire))
    }

    fn set_position(&self, frames: f64) {
        self.position.store(frames.to_bits(), Ordering::Release);
    }
}

pub fn pcm_transport(format: StreamFormat, capacity: usize) -> (PcmTransport, PcmSource) {
    let (cmd_tx, cmd_rx) = RingBuffer::new(capacity);
    let (retired_tx, retired_rx) = RingBuffer::new(capacity);
    let status = Arc::new(TransportStatus { position: AtomicU64::new(0f64.to_bits()), playing: AtomicBool::new(false) });
    (
        PcmTransport {
            format,
            commands: cmd_tx,
            retired: retired_rx,
            status: status.clone(),
            library: HashMap::new(),
            current: None,
            rate: 1.0,
        },
        PcmSource {
            clip: None,
            position: 0.0,
            playing: false,
            rate: 1.0,
            commands: cmd_rx,
            retired: retired_tx,
            status,
        },
    )
}

/// Control side of the in-memory transport.
pub struct PcmTransport {
    format: StreamFormat,
    commands: Producer<TransportCommand>,
    retired: Consumer<PcmClip>,
    status: Arc<TransportStatus>,
    library: HashMap<String, PcmClip>,
    current: Option<PcmClip>,
    rate: f32,
}

impl PcmTransport {
    /// Make `clip` loadable under `url`.
    pub fn insert_clip(&mut self, url: impl Into<String>, clip: PcmClip) {
        self.library.insert(url.into(), clip);
    }

    pub fn current_clip(&self) -> Option<&PcmClip> {
        self.current.as_ref()
    }

    fn send(&mut self, cmd: TransportCommand) -> Result<(), TransportError> {
        // Clips the render side replaced are freed here, never over there.
        while let Ok(clip) = self.retired.pop() {
            drop(clip);
        }
        self.commands.push(cmd).map_err(|_| TransportError::QueueFull)
    }
}

impl Transport for PcmTransport {
    fn load(&mut self, url: &str) -> Result<(), TransportError> {
        let clip = self.library.get(url).cloned().ok_or_else(|| TransportError::UnknownSource(url.to_string()))?;
        if clip.sample_rate != self.format.sample_rate {
            return Err(TransportError::SampleRateMismatch { clip: clip.sample_rate, stream: self.format.sample_rate });
        }
        self.send(TransportCommand::Load(clip.clone()))?;
        self.current = Some(clip);
        self.status.playing.store(false, Ordering::Release);
        self.status.set_position(0.0);
        log::info!("transport: loaded {url}");
        Ok(())
    }

    fn play(&mut self) -> Result<(), TransportError> {
        self.send(TransportCommand::Play)?;
        self.status.playing.store(self.current.is_some(), Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), TransportError> {
        self.send(TransportCommand::Pause)?;
        self.status.playing.store(false, Ordering::Release);
        Ok(())
    }

    fn seek(&mut self, seconds: f64) -> Result<(), TransportError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(TransportError::InvalidSeek(seconds));
        }
        let max = self.current.as_ref().map_or(0, PcmClip::frames) as f64;
        let frames = (seconds * self.format.sample_rate as f64).min(max);
        self.send(TransportCommand::Seek(frames))?;
        self.status.set_position(frames);
        Ok(())
    }

    fn set_playback_rate(&mut self, rate: f32) -> Result<(), TransportError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(TransportError::InvalidRate(rate));
        }
        let rate = rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
        if rate != self.rate {
            self.send(TransportCommand::Rate(rate))?;
            self.rate = rate;
        }
        Ok(())
    }

    fn playback_rate(&self) -> f32 {
        self.rate
    }

    fn current_time(&self) -> f64 {
        self.status.position() / self.format.sample_rate as f64
    }

    fn duration(&self) -> Option<f64> {
        self.current.as_ref().map(PcmClip::duration)
    }

    fn is_playing(&self) -> bool {
        self.status.playing.load(Ordering::Acquire)
    }
}

/// Render side of the in-memory transport.
pub struct PcmSource {
    clip: Option<PcmClip>,
    /// Fractional frame position.
    position: f64,
    playing: bool,
    rate: f64,
    commands: Consumer<TransportCommand>,
    retired: Producer<PcmClip>,
    status: Arc<TransportStatus>,
}

impl PcmSource {
    fn apply_commands(&mut self) {
        loop {
            // A replaced clip has to go back to the control side, so a Load
            // stays queued until there is room to return the old one.
            let load_blocked = self.clip.is_some() && self.retired.is_full();
            if load_blocked && matches!(self.commands.peek(), Ok(TransportCommand::Load(_))) {
                return;
            }
            let Ok(cmd) = self.commands.pop() else { return };
            match cmd {
                TransportCommand::Load(clip) => {
                    if let Some(old) = self.clip.replace(clip) {
                        let returned = self.retired.push(old);
                        debug_assert!(returned.is_ok());
                    }
                    self.position = 0.0;
                    self.playing = false;
                }
                TransportCommand::Play => self.playing = self.clip.is_some(),
                TransportCommand::Pause => self.playing = false,
                TransportCommand::Seek(frames) => self.position = frames,
                TransportCommand::Rate(rate) => self.rate = rate as f64,
            }
        }
    }
}

impl BlockSource for PcmSource {
    fn pull(&mut self, block: &mut AudioBlock) {
        self.apply_commands();
        let Some(clip) = self.clip.as_ref().filter(|_| self.playing) else {
            block.fill_silence();
            return;
        };

        let end = clip.frames() as f64;
        let mut ended = false;
        for i in 0..block.frames() {
            if self.position >= end {
                ended = true;
                for ch in 0..block.channels() {
                    block.channel_mut(ch)[i..].fill(0.0);
                }
                break;
            }
            let idx = self.position as usize;
            let t = (self.position - idx as f64) as f32;
            for ch in 0..block.channels() {
                let a = clip.sample(idx, ch);
                block.channel_mut(ch)[i] = if t == 0.0 { a } else { lerp(a, clip.sample(idx + 1, ch), t) };
            }
            self.position += self.rate;
        }

        if ended {
            self.playing = false;
            self.position = end;
            self.status.playing.store(false, Ordering::Release);
        }
        self.status.set_position(self.position);
    }
}
