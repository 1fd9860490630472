//! Render-thread shell around one [`TimePitch`] instance.
//!
//! Everything here runs inside the audio callback: no allocation, no locks,
//! no logging. Diagnostics go back to the control thread as [`ProcessorEvent`]s.
//!
//! Once initialized the algorithm is fed every input block, including while
//! unity parameters copy the input straight through. A switch between the two
//! paths then crossfades over one block instead of restarting the algorithm.

use crate::block::{AudioBlock, BlockSource, StreamFormat};
use crate::dsp::stretch::{TimePitch, FRAME};
use crate::error::ProcessingFault;
use crate::message::{ProcessorEndpoint, ProcessorEvent, ProcessorMessage};
use crate::params::PitchTempoParameters;
use crate::ring::SampleRing;

/// Upper bound on input blocks pulled from the source for one output block.
pub const MAX_PULLS_PER_QUANTUM: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorMode {
    /// No `init` seen yet: output is silence.
    Uninitialized,
    /// Unity parameters: input copied through untouched, after a one-block
    /// crossfade when coming from `Transform`.
    PassThrough,
    Transform,
}

pub struct BlockProcessor {
    format: StreamFormat,
    endpoint: ProcessorEndpoint,
    params: PitchTempoParameters,
    initialized: bool,
    mode: ProcessorMode,
    engine: TimePitch,
    /// Produced-but-unplayed output, one ring per channel.
    fifo: Box<[SampleRing]>,
    input: AudioBlock,
    /// Transform output taken while the dry path is audible.
    wet: AudioBlock,
}

impl BlockProcessor {
    pub fn new(format: StreamFormat, endpoint: ProcessorEndpoint) -> Self {
        let fifo_capacity = 4 * FRAME + 2 * format.block_frames;
        Self {
            format,
            endpoint,
            params: PitchTempoParameters::default(),
            initialized: false,
            mode: ProcessorMode::Uninitialized,
            engine: TimePitch::new(format.channels, format.block_frames),
            fifo: (0..format.channels).map(|_| SampleRing::with_capacity(fifo_capacity)).collect(),
            input: AudioBlock::for_format(&format),
            wet: AudioBlock::for_format(&format),
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn mode(&self) -> ProcessorMode {
        self.mode
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Latest parameters received. The algorithm picks them up at its next
    /// window boundary.
    pub fn params(&self) -> PitchTempoParameters {
        self.params
    }

    /// Parameters the algorithm is currently synthesizing with.
    pub fn active_params(&self) -> PitchTempoParameters {
        self.engine.active_params()
    }

    /// Apply every queued message. Called at each block boundary, including
    /// while the processor is installed but not routed.
    pub fn service(&mut self) {
        while let Some(msg) = self.endpoint.try_recv() {
            self.handle(msg);
        }
    }

    fn handle(&mut self, msg: ProcessorMessage) {
        match msg {
            ProcessorMessage::Init(_) => {
                self.initialized = true;
                self.restart();
                self.endpoint.send(ProcessorEvent::Initialized);
            }
            ProcessorMessage::SetPitch(semitones) => {
                if self.params.set_semitones(semitones) {
                    self.engine.set_params(self.params);
                }
            }
            ProcessorMessage::SetTempo(ratio) => {
                if self.params.set_tempo(ratio) {
                    self.engine.set_params(self.params);
                }
            }
        }
    }

    /// Fill `output` with exactly one block, pulling as many input blocks from
    /// `source` as the algorithm needs. Never fails: faults become silence plus
    /// a diagnostic event.
    pub fn render(&mut self, source: &mut dyn BlockSource, output: &mut AudioBlock) {
        self.service();

        if !output.same_shape(&self.input) {
            source.pull(&mut self.input);
            self.fault(ProcessingFault::ShapeMismatch, output);
            return;
        }

        let prev = self.mode;
        self.mode = if !self.initialized {
            ProcessorMode::Uninitialized
        } else if self.params.is_unity() {
            ProcessorMode::PassThrough
        } else {
            ProcessorMode::Transform
        };

        match (prev, self.mode) {
            (_, ProcessorMode::Uninitialized) => {
                source.pull(&mut self.input);
                output.fill_silence();
            }
            (ProcessorMode::PassThrough, ProcessorMode::Transform)
            | (ProcessorMode::Transform, ProcessorMode::PassThrough) => self.crossfade(source, output),
            (_, ProcessorMode::PassThrough) => {
                source.pull(&mut self.input);
                output.copy_from(&self.input);
                if self.feed().is_err() {
                    // The dry copy stands; start the transform over.
                    self.restart();
                }
            }
            (_, ProcessorMode::Transform) => {
                if let Err(fault) = self.transform(source, output) {
                    self.fault(fault, output);
                }
            }
        }
    }

    /// One block that moves between the dry and transformed paths. Exactly one
    /// input block is pulled, so the dry side continues where it left off, and
    /// the transformed side continues from its FIFO.
    fn crossfade(&mut self, source: &mut dyn BlockSource, output: &mut AudioBlock) {
        source.pull(&mut self.input);
        if let Err(fault) = self.feed() {
            self.fault(fault, output);
            return;
        }
        let (from, to) = match self.mode {
            ProcessorMode::Transform => (&self.input, &self.wet),
            _ => (&self.wet, &self.input),
        };
        let frames = output.frames() as f32;
        for ch in 0..output.channels() {
            let (a, b) = (from.channel(ch), to.channel(ch));
            for (i, out) in output.channel_mut(ch).iter_mut().enumerate() {
                let g = (i + 1) as f32 / frames;
                *out = a[i] + (b[i] - a[i]) * g;
            }
        }
    }

    /// Run the transform on the block in `input` and take one block of its
    /// output into `wet`, keeping it in step with the dry path.
    fn feed(&mut self) -> Result<(), ProcessingFault> {
        self.engine.push(&self.input)?;
        self.engine.pump(&self.fifo)?;
        for (ch, ring) in self.fifo.iter().enumerate() {
            let wet = self.wet.channel_mut(ch);
            let n = ring.pop_up_to(wet);
            wet[n..].fill(0.0);
        }
        Ok(())
    }

    fn transform(&mut self, source: &mut dyn BlockSource, output: &mut AudioBlock) -> Result<(), ProcessingFault> {
        let frames = output.frames();
        // One block beyond this one stays buffered, so a switch back to the
        // dry path always has transformed audio to fade out of.
        let target = 2 * frames;
        let mut pulls = 0;
        loop {
            self.engine.pump(&self.fifo)?;
            if self.fifo[0].len() >= target || pulls == MAX_PULLS_PER_QUANTUM || !self.engine.needs_input() {
                break;
            }
            source.pull(&mut self.input);
            self.engine.push(&self.input)?;
            pulls += 1;
        }

        for (ch, ring) in self.fifo.iter().enumerate() {
            let out = output.channel_mut(ch);
            let n = ring.pop_up_to(out);
            // Starved (stream start or pull cap): pad with silence.
            out[n..].fill(0.0);
        }
        Ok(())
    }

    fn restart(&mut self) {
        self.engine.reset_with(self.params);
        for ring in self.fifo.iter() {
            ring.clear();
        }
    }

    fn fault(&mut self, fault: ProcessingFault, output: &mut AudioBlock) {
        output.fill_silence();
        self.restart();
        self.endpoint.send(ProcessorEvent::Fault(fault));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{message_channel, InitConfig, ProcessorPort};

    const SR: f32 = 48_000.0;

    /// Sine source that counts the frames it has handed out.
    struct Tone {
        hz: f32,
        pos: usize,
        poison: bool,
    }

    impl Tone {
        fn new(hz: f32) -> Self {
            Self { hz, pos: 0, poison: false }
        }

        fn sample(&self, n: usize) -> f32 {
            (2.0 * std::f32::consts::PI * self.hz * n as f32 / SR).sin() * 0.5
        }
    }

    impl BlockSource for Tone {
        fn pull(&mut self, block: &mut AudioBlock) {
            for ch in 0..block.channels() {
                for (i, s) in block.channel_mut(ch).iter_mut().enumerate() {
                    *s = if self.poison { f32::NAN } else { self.sample(self.pos + i) };
                }
            }
            self.pos += block.frames();
        }
    }

    fn format() -> StreamFormat {
        StreamFormat { sample_rate: 48_000, channels: 2, block_frames: 128 }
    }

    fn setup() -> (ProcessorPort, BlockProcessor) {
        let (port, endpoint) = message_channel(16);
        (port, BlockProcessor::new(format(), endpoint))
    }

    fn init(port: &mut ProcessorPort, p: &mut BlockProcessor) {
        port.post(ProcessorMessage::Init(InitConfig::default())).unwrap();
        p.service();
        assert_eq!(port.try_recv(), Some(ProcessorEvent::Initialized));
    }

    #[test]
    fn uninitialized_renders_silence_of_the_right_shape() {
        let (_port, mut p) = setup();
        let mut src = Tone::new(440.0);
        let mut out = AudioBlock::from_fn(2, 128, |_, _| 0.3);
        for _ in 0..4 {
            p.render(&mut src, &mut out);
            assert_eq!((out.channels(), out.frames()), (2, 128));
            assert!(out.is_silent());
        }
        assert_eq!(p.mode(), ProcessorMode::Uninitialized);
        assert_eq!(src.pos, 4 * 128);
    }

    #[test]
    fn parameters_before_init_do_not_unmute() {
        let (mut port, mut p) = setup();
        port.post(ProcessorMessage::SetPitch(5.0)).unwrap();
        let mut src = Tone::new(440.0);
        let mut out = AudioBlock::for_format(&format());
        p.render(&mut src, &mut out);
        assert!(out.is_silent());
        assert_eq!(p.params().semitones(), 5.0);
    }

    #[test]
    fn unity_parameters_pass_input_through_bit_identical() {
        let (mut port, mut p) = setup();
        init(&mut port, &mut p);
        let mut src = Tone::new(440.0);
        let mut reference = Tone::new(440.0);
        let mut out = AudioBlock::for_format(&format());
        let mut expected = AudioBlock::for_format(&format());
        for _ in 0..8 {
            p.render(&mut src, &mut out);
            reference.pull(&mut expected);
            assert_eq!(out, expected);
        }
        assert_eq!(p.mode(), ProcessorMode::PassThrough);
    }

    #[test]
    fn returning_to_zero_pitch_restores_pass_through() {
        let (mut port, mut p) = setup();
        init(&mut port, &mut p);
        let mut src = Tone::new(440.0);
        let mut out = AudioBlock::for_format(&format());

        port.post(ProcessorMessage::SetPitch(7.0)).unwrap();
        for _ in 0..40 {
            p.render(&mut src, &mut out);
        }
        assert_eq!(p.mode(), ProcessorMode::Transform);

        // One crossfade block, then the dry path.
        port.post(ProcessorMessage::SetPitch(0.0)).unwrap();
        p.render(&mut src, &mut out);
        assert_eq!(p.mode(), ProcessorMode::PassThrough);

        let mut expected = AudioBlock::for_format(&format());
        for _ in 0..4 {
            let mut reference = Tone::new(440.0);
            reference.pos = src.pos;
            reference.pull(&mut expected);
            p.render(&mut src, &mut out);
            assert_eq!(out, expected);
        }
    }

    /// Largest sample-to-sample step on channel 0, across block boundaries.
    fn max_step(samples: &[f32]) -> f32 {
        samples.windows(2).map(|w| (w[1] - w[0]).abs()).fold(0.0, f32::max)
    }

    /// Steepest slope of a 0.5-amplitude sine at `hz`.
    fn sine_step(hz: f32) -> f32 {
        2.0 * std::f32::consts::PI * hz / SR * 0.5
    }

    fn longest_zero_run(samples: &[f32]) -> usize {
        let (mut run, mut longest) = (0, 0);
        for &s in samples {
            run = if s == 0.0 { run + 1 } else { 0 };
            longest = longest.max(run);
        }
        longest
    }

    /// Render `blocks` blocks, appending channel 0 to `left`.
    fn render_into(p: &mut BlockProcessor, src: &mut Tone, blocks: usize, left: &mut Vec<f32>) {
        let mut out = AudioBlock::for_format(&format());
        for _ in 0..blocks {
            p.render(src, &mut out);
            left.extend_from_slice(out.channel(0));
        }
    }

    #[test]
    fn steady_transform_is_continuous_across_blocks() {
        let (mut port, mut p) = setup();
        init(&mut port, &mut p);
        port.post(ProcessorMessage::SetPitch(5.0)).unwrap();
        let mut src = Tone::new(220.0);
        let mut left = Vec::new();
        render_into(&mut p, &mut src, 40, &mut left);
        left.clear();
        render_into(&mut p, &mut src, 200, &mut left);

        let limit = 1.5 * sine_step(220.0 * (5.0f32 / 12.0).exp2());
        let step = max_step(&left);
        assert!(step < limit, "step {step} exceeds {limit}");
        assert!(longest_zero_run(&left) < 2);
    }

    #[test]
    fn parameter_changes_inside_the_transform_stay_continuous() {
        let (mut port, mut p) = setup();
        init(&mut port, &mut p);
        port.post(ProcessorMessage::SetPitch(2.0)).unwrap();
        let mut src = Tone::new(220.0);
        let mut left = Vec::new();
        render_into(&mut p, &mut src, 40, &mut left);
        left.clear();

        let settings = [(3.0, 0.9), (-2.0, 1.2), (1.0, 0.8), (4.0, 1.1)];
        for round in 0..5 {
            for &(semis, tempo) in &settings {
                port.post(ProcessorMessage::SetPitch(semis)).unwrap();
                port.post(ProcessorMessage::SetTempo(tempo)).unwrap();
                render_into(&mut p, &mut src, 12 + round, &mut left);
            }
        }
        assert_eq!(p.mode(), ProcessorMode::Transform);

        let highest = 220.0 * (4.0f32 / 12.0).exp2();
        let limit = 2.0 * sine_step(highest);
        let step = max_step(&left);
        assert!(step < limit, "step {step} exceeds {limit}");
        assert!(longest_zero_run(&left) < 2);
    }

    #[test]
    fn switching_between_unity_and_transform_has_no_gap_or_jump() {
        let (mut port, mut p) = setup();
        init(&mut port, &mut p);
        let mut src = Tone::new(220.0);
        let mut left = Vec::new();
        render_into(&mut p, &mut src, 100, &mut left);
        assert_eq!(p.mode(), ProcessorMode::PassThrough);

        for _ in 0..3 {
            port.post(ProcessorMessage::SetPitch(1.0)).unwrap();
            render_into(&mut p, &mut src, 60, &mut left);
            assert_eq!(p.mode(), ProcessorMode::Transform);
            port.post(ProcessorMessage::SetPitch(0.0)).unwrap();
            render_into(&mut p, &mut src, 40, &mut left);
            assert_eq!(p.mode(), ProcessorMode::PassThrough);
        }

        // The crossfade adds at most one block's gain ramp on top of the tone.
        let limit = 2.0 * sine_step(220.0 * (1.0f32 / 12.0).exp2());
        let step = max_step(&left);
        assert!(step < limit, "step {step} exceeds {limit}");
        assert!(longest_zero_run(&left[1..]) < 2, "silence inside the stream");

        // Back on the dry path the output is the source itself.
        let tail = &left[left.len() - 128..];
        let start = src.pos - 128;
        for (i, &s) in tail.iter().enumerate() {
            assert_eq!(s, src.sample(start + i));
        }
    }

    #[test]
    fn out_of_range_values_clamp_independently() {
        let (mut port, mut p) = setup();
        init(&mut port, &mut p);
        port.post(ProcessorMessage::SetTempo(1.5)).unwrap();
        port.post(ProcessorMessage::SetPitch(13.0)).unwrap();
        p.service();
        assert_eq!(p.params(), PitchTempoParameters::new(12.0, 1.5));

        port.post(ProcessorMessage::SetTempo(0.2)).unwrap();
        p.service();
        assert_eq!(p.params(), PitchTempoParameters::new(12.0, 0.5));
    }

    #[test]
    fn bad_messages_are_ignored_and_later_ones_still_apply() {
        let (mut port, mut p) = setup();
        init(&mut port, &mut p);
        assert!(port.post_json(r#"{"type":"setReverb","value":1}"#).is_err());
        port.post(ProcessorMessage::SetPitch(f32::NAN)).unwrap();
        port.post_json(r#"{"type":"setPitch","value":-3}"#).unwrap();

        let mut src = Tone::new(440.0);
        let mut out = AudioBlock::for_format(&format());
        p.render(&mut src, &mut out);
        assert_eq!(p.params().semitones(), -3.0);
        assert_eq!(p.params().tempo(), 1.0);
    }

    #[test]
    fn pitch_and_tempo_sent_before_first_render_apply_together() {
        let (mut port, mut p) = setup();
        init(&mut port, &mut p);
        port.post(ProcessorMessage::SetPitch(7.0)).unwrap();
        port.post(ProcessorMessage::SetTempo(0.8)).unwrap();

        let mut src = Tone::new(440.0);
        let mut out = AudioBlock::for_format(&format());
        p.render(&mut src, &mut out);
        assert_eq!(p.active_params(), PitchTempoParameters::new(7.0, 0.8));

        let mut left = Vec::new();
        for _ in 0..400 {
            p.render(&mut src, &mut out);
            left.extend_from_slice(out.channel(0));
        }
        let warm = 8 * FRAME;
        let start_pulled = src.pos;
        for _ in 0..400 {
            p.render(&mut src, &mut out);
            left.extend_from_slice(out.channel(0));
        }
        let consumed = (src.pos - start_pulled) as f32 / (400.0 * 128.0);
        assert!((consumed - 0.8).abs() < 0.04, "input per output {consumed}");

        let ups = left[warm..].windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count();
        let hz = ups as f32 * SR / (left.len() - warm) as f32;
        let expected = 440.0 * (7.0f32 / 12.0).exp2();
        assert!((hz - expected).abs() < expected * 0.03, "{hz} Hz vs {expected} Hz");
    }

    #[test]
    fn processing_fault_yields_one_silent_block_and_recovers() {
        let (mut port, mut p) = setup();
        init(&mut port, &mut p);
        port.post(ProcessorMessage::SetPitch(3.0)).unwrap();

        let mut src = Tone::new(440.0);
        src.poison = true;
        let mut out = AudioBlock::for_format(&format());
        let mut faulted = false;
        for _ in 0..16 {
            p.render(&mut src, &mut out);
            if let Some(ProcessorEvent::Fault(f)) = port.try_recv() {
                assert_eq!(f, ProcessingFault::NonFinite);
                assert!(out.is_silent());
                faulted = true;
                break;
            }
        }
        assert!(faulted);

        src.poison = false;
        let mut heard = false;
        for _ in 0..40 {
            p.render(&mut src, &mut out);
            heard |= !out.is_silent();
        }
        assert!(heard);
        assert_eq!(port.try_recv(), None);
    }

    #[test]
    fn mismatched_output_shape_is_silenced_and_reported() {
        let (mut port, mut p) = setup();
        init(&mut port, &mut p);
        let mut src = Tone::new(440.0);
        let mut out = AudioBlock::from_fn(1, 64, |_, _| 1.0);
        p.render(&mut src, &mut out);
        assert!(out.is_silent());
        assert_eq!(port.try_recv(), Some(ProcessorEvent::Fault(ProcessingFault::ShapeMismatch)));
    }

    #[test]
    fn repeated_init_is_acknowledged_again() {
        let (mut port, mut p) = setup();
        init(&mut port, &mut p);
        init(&mut port, &mut p);
        assert!(p.is_initialized());
    }
}
