//! Pitch and tempo transform: WSOLA time-stretch followed by cubic resampling.
//!
//! The stretch stage changes duration by `pitch_ratio / tempo` without touching
//! pitch; resampling by `pitch_ratio` then restores the requested duration while
//! scaling every frequency. Net effect: output length = input length / tempo,
//! frequencies scaled by `2^(semitones / 12)`.
//!
//! All buffers are sized at construction; the render path only appends within
//! capacity and shifts in place.

use super::interp::hermite;
use crate::block::AudioBlock;
use crate::error::ProcessingFault;
use crate::params::PitchTempoParameters;
use crate::ring::SampleRing;

/// Analysis/synthesis frame length.
pub const FRAME: usize = 1024;
/// Synthesis hop (50% overlap).
pub const HOP: usize = FRAME / 2;
/// Maximum distance an analysis frame may move to line up with its predecessor.
pub const SEEK: usize = 128;

const OVERLAP: usize = FRAME - HOP;
const CORR_STRIDE: usize = 4;
const STRETCH_CAPACITY: usize = 4 * FRAME;

/// Per-channel buffers.
struct Lane {
    /// Unconsumed input, starting at the oldest sample still needed.
    input: Vec<f32>,
    /// Overlap-add accumulator, one frame long.
    acc: Box<[f32]>,
    /// Stretched signal awaiting resampling; index 0 is history for interpolation.
    stretched: Vec<f32>,
}

pub struct TimePitch {
    window: Box<[f32]>,
    lanes: Vec<Lane>,
    active: PitchTempoParameters,
    pending: Option<PitchTempoParameters>,
    /// Nominal start of the next analysis frame, in input samples. Keeps the
    /// fractional part of non-integer hops between calls.
    cursor: f64,
    /// Where the previous frame would naturally continue (its start + HOP).
    continuation: Option<usize>,
    /// Read position of the resampler in `stretched`.
    phase: f64,
    input_capacity: usize,
}

impl TimePitch {
    pub fn new(channels: usize, max_block: usize) -> Self {
        let input_capacity = 4 * FRAME + 2 * SEEK + 2 * max_block;
        let lanes = (0..channels)
            .map(|_| Lane {
                input: Vec::with_capacity(input_capacity),
                acc: vec![0.0; FRAME].into_boxed_slice(),
                stretched: Vec::with_capacity(STRETCH_CAPACITY),
            })
            .collect();
        let mut tp = Self {
            window: hann(FRAME),
            lanes,
            active: PitchTempoParameters::default(),
            pending: None,
            cursor: 0.0,
            continuation: None,
            phase: 1.0,
            input_capacity,
        };
        tp.reset_with(PitchTempoParameters::default());
        tp
    }

    pub fn channels(&self) -> usize {
        self.lanes.len()
    }

    /// Parameters used by the frame currently being synthesized.
    pub fn params(&self) -> PitchTempoParameters {
        self.pending.unwrap_or(self.active)
    }

    pub fn active_params(&self) -> PitchTempoParameters {
        self.active
    }

    /// Queue new parameters; they are latched when the next analysis frame starts.
    pub fn set_params(&mut self, params: PitchTempoParameters) {
        self.pending = Some(params);
    }

    /// Drop all buffered audio and start a fresh stream with `params`.
    pub fn reset_with(&mut self, params: PitchTempoParameters) {
        for lane in &mut self.lanes {
            lane.input.clear();
            // Stream start is padded with one hop of silence so the first frame
            // never needs samples from before the stream began.
            lane.input.resize(HOP, 0.0);
            lane.acc.fill(0.0);
            lane.stretched.clear();
            lane.stretched.push(0.0);
        }
        self.active = params;
        self.pending = None;
        self.cursor = 0.0;
        self.continuation = None;
        self.phase = 1.0;
    }

    /// Append one block of input.
    pub fn push(&mut self, block: &AudioBlock) -> Result<(), ProcessingFault> {
        if block.channels() != self.lanes.len() {
            return Err(ProcessingFault::ShapeMismatch);
        }
        if self.lanes.iter().any(|l| l.input.len() + block.frames() > self.input_capacity) {
            return Err(ProcessingFault::InputOverflow);
        }
        for (ch, lane) in self.lanes.iter_mut().enumerate() {
            lane.input.extend_from_slice(block.channel(ch));
        }
        Ok(())
    }

    /// Whether the next analysis frame is waiting on more input.
    pub fn needs_input(&self) -> bool {
        self.lanes.first().map_or(false, |l| l.input.len() < self.required_input())
    }

    /// Run as many frames as input and output space allow, pushing output
    /// samples into `out` (one ring per channel).
    pub fn pump(&mut self, out: &[SampleRing]) -> Result<(), ProcessingFault> {
        debug_assert_eq!(out.len(), self.lanes.len());
        loop {
            self.resample(out)?;
            if !self.synthesize_frame() {
                return Ok(());
            }
        }
    }

    fn analysis_hop(&self) -> f64 {
        HOP as f64 / self.active.stretch_factor()
    }

    fn required_input(&self) -> usize {
        let ahead = self.cursor.round() as usize + SEEK + FRAME;
        match self.continuation {
            Some(c) => ahead.max(c + OVERLAP),
            None => ahead,
        }
    }

    /// One WSOLA step. Returns false when blocked on input or stretch space.
    fn synthesize_frame(&mut self) -> bool {
        if self.lanes.is_empty() || self.lanes[0].stretched.len() + HOP > STRETCH_CAPACITY {
            return false;
        }
        // Window boundary: safe point to switch parameters.
        if let Some(p) = self.pending.take() {
            self.active = p;
        }
        if self.needs_input() {
            return false;
        }

        let nominal = self.cursor.round() as usize;
        let pos = match self.continuation {
            Some(target) => self.best_offset(nominal, target),
            None => nominal,
        };

        for lane in &mut self.lanes {
            let frame = &lane.input[pos..pos + FRAME];
            for ((a, &x), &w) in lane.acc.iter_mut().zip(frame).zip(self.window.iter()) {
                *a += x * w;
            }
            lane.stretched.extend_from_slice(&lane.acc[..HOP]);
            lane.acc.copy_within(HOP.., 0);
            lane.acc[OVERLAP..].fill(0.0);
        }

        self.continuation = Some(pos + HOP);
        self.cursor += self.analysis_hop();
        self.compact_input();
        true
    }

    /// Candidate start in `nominal ± SEEK` whose opening overlap best matches the
    /// natural continuation at `target`. Ties go to the candidate nearest `nominal`.
    fn best_offset(&self, nominal: usize, target: usize) -> usize {
        let target_energy: f32 = self
            .lanes
            .iter()
            .map(|l| l.input[target..target + OVERLAP].iter().step_by(CORR_STRIDE).map(|x| x * x).sum::<f32>())
            .sum();
        if target_energy <= f32::EPSILON {
            return nominal;
        }

        let mut best = nominal;
        let mut best_score = f32::NEG_INFINITY;
        for d in 0..=SEEK {
            let below = if d > 0 { nominal.checked_sub(d) } else { None };
            for cand in [Some(nominal + d), below].into_iter().flatten() {
                let mut corr = 0.0f32;
                let mut energy = 0.0f32;
                for lane in &self.lanes {
                    let a = &lane.input[cand..cand + OVERLAP];
                    let b = &lane.input[target..target + OVERLAP];
                    for (x, y) in a.iter().step_by(CORR_STRIDE).zip(b.iter().step_by(CORR_STRIDE)) {
                        corr += x * y;
                        energy += x * x;
                    }
                }
                let score = corr / (energy + f32::EPSILON).sqrt();
                if score > best_score {
                    best_score = score;
                    best = cand;
                }
            }
        }
        best
    }

    fn compact_input(&mut self) {
        let Some(continuation) = self.continuation else { return };
        let keep_from = continuation.min((self.cursor.floor() as usize).saturating_sub(SEEK));
        if keep_from == 0 {
            return;
        }
        for lane in &mut self.lanes {
            lane.input.drain(..keep_from);
        }
        self.cursor -= keep_from as f64;
        self.continuation = Some(continuation - keep_from);
    }

    fn resample(&mut self, out: &[SampleRing]) -> Result<(), ProcessingFault> {
        let step = self.active.pitch_ratio();
        let len = self.lanes[0].stretched.len();
        let mut room = out.iter().map(SampleRing::free).min().unwrap_or(0);

        while room > 0 {
            let i = self.phase as usize;
            if i + 2 >= len {
                break;
            }
            let t = (self.phase - i as f64) as f32;
            for (lane, ring) in self.lanes.iter().zip(out) {
                let s = &lane.stretched;
                let v = hermite(s[i - 1], s[i], s[i + 1], s[i + 2], t);
                if !v.is_finite() {
                    return Err(ProcessingFault::NonFinite);
                }
                ring.push(v);
            }
            self.phase += step;
            room -= 1;
        }

        // Keep one sample of history behind the read position.
        let consumed = (self.phase as usize).saturating_sub(1).min(len);
        if consumed > 0 {
            for lane in &mut self.lanes {
                lane.stretched.drain(..consumed);
            }
            self.phase -= consumed as f64;
        }
        Ok(())
    }
}

/// Periodic Hann window; copies offset by `len / 2` sum to exactly 1.
fn hann(len: usize) -> Box<[f32]> {
    (0..len)
        .map(|n| {
            let x = std::f64::consts::PI * n as f64 / len as f64;
            (x.sin() * x.sin()) as f32
        })
        .collect()
}
