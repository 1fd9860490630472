//! cpal output host: runs a [`SignalGraph`] inside the device callback.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::block::{AudioBlock, StreamFormat};
use crate::devices::pick_output_device;
use crate::graph::SignalGraph;
use crate::EngineConfig;

/// Adapts the device's callback size, whatever it is, to the graph's fixed
/// render quantum. All buffers are allocated up front.
pub(crate) struct QuantumAdapter {
    graph: SignalGraph,
    block: AudioBlock,
    pending: Vec<f32>,
    cursor: usize,
}

impl QuantumAdapter {
    pub(crate) fn new(graph: SignalGraph) -> Self {
        let format = graph.format();
        let len = format.block_frames * format.channels;
        Self { graph, block: AudioBlock::for_format(&format), pending: vec![0.0; len], cursor: len }
    }

    /// Fill an interleaved device buffer, converting each sample with `convert`.
    pub(crate) fn fill<S>(&mut self, out: &mut [S], convert: impl Fn(f32) -> S) {
        for o in out.iter_mut() {
            if self.cursor == self.pending.len() {
                self.graph.render(&mut self.block);
                self.block.write_interleaved(&mut self.pending);
                self.cursor = 0;
            }
            *o = convert(self.pending[self.cursor]);
            self.cursor += 1;
        }
    }
}

fn to_i16(v: f32) -> i16 {
    (v.clamp(-1.0, 1.0) * 32767.0) as i16
}

fn to_u16(v: f32) -> u16 {
    (((v.clamp(-1.0, 1.0) + 1.0) * 0.5) * 65535.0) as u16
}

pub struct CpalHost {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    format: StreamFormat,
    stream: Option<cpal::Stream>,
}

impl CpalHost {
    /// Pick a device and negotiate the stream format without starting it.
    pub fn open(cfg: &EngineConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = pick_output_device(&host, cfg.output_name.as_deref(), cfg.output_index)?
            .context("No output device matched (and no default available)")?;
        let default = device.default_output_config().context("No default output config")?;
        let sample_format = default.sample_format();

        let mut config = default.config();
        // Best effort: the backend may still refuse at build time.
        if let Some(sr) = cfg.sample_rate {
            config.sample_rate = cpal::SampleRate(sr);
        }
        if let Some(ch) = cfg.channels {
            config.channels = ch;
        }

        let format = StreamFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels as usize,
            block_frames: cfg.block_frames.max(1),
        };
        log::info!(
            "output: {} ({} Hz, {} ch, {:?})",
            device.name().unwrap_or_default(),
            format.sample_rate,
            format.channels,
            sample_format
        );
        Ok(Self { device, config, sample_format, format, stream: None })
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn device_name(&self) -> String {
        self.device.name().unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    pub fn start(&mut self, graph: SignalGraph) -> Result<()> {
        if graph.format() != self.format {
            return Err(anyhow!("graph format {:?} does not match output {:?}", graph.format(), self.format));
        }
        let mut adapter = QuantumAdapter::new(graph);
        let err_fn = |err: cpal::StreamError| log::error!("output stream error: {err}");

        let stream = match self.sample_format {
            cpal::SampleFormat::F32 => self.device.build_output_stream::<f32, _, _>(
                &self.config,
                move |out: &mut [f32], _| adapter.fill(out, |v| v),
                err_fn,
                None,
            )?,
            cpal::SampleFormat::I16 => self.device.build_output_stream::<i16, _, _>(
                &self.config,
                move |out: &mut [i16], _| adapter.fill(out, to_i16),
                err_fn,
                None,
            )?,
            cpal::SampleFormat::U16 => self.device.build_output_stream::<u16, _, _>(
                &self.config,
                move |out: &mut [u16], _| adapter.fill(out, to_u16),
                err_fn,
                None,
            )?,
            other => return Err(anyhow!("Unsupported output format: {other:?}")),
        };

        stream.play().context("Failed to play output stream")?;
        self.stream = Some(stream);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockSource;
    use crate::graph::{signal_graph, GraphOptions};

    struct Frames(f32);

    impl BlockSource for Frames {
        fn pull(&mut self, block: &mut AudioBlock) {
            for i in 0..block.frames() {
                self.0 += 1.0;
                for ch in 0..block.channels() {
                    block.channel_mut(ch)[i] = self.0 / 1000.0;
                }
            }
        }
    }

    #[test]
    fn adapter_spans_callbacks_of_any_size() {
        let format = StreamFormat { sample_rate: 48_000, channels: 2, block_frames: 4 };
        let (_h, graph) = signal_graph(format, Box::new(Frames(0.0)), GraphOptions::default());
        let mut adapter = QuantumAdapter::new(graph);

        let mut out = Vec::new();
        for size in [3usize, 10, 1, 6] {
            let mut buf = vec![0.0f32; size];
            adapter.fill(&mut buf, |v| v);
            out.extend(buf);
        }
        assert_eq!(out.len(), 20);
        for (i, pair) in out.chunks(2).enumerate() {
            let want = (i + 1) as f32 / 1000.0;
            assert_eq!(pair, [want, want]);
        }
    }

    #[test]
    fn integer_conversions_saturate() {
        assert_eq!(to_i16(2.0), 32767);
        assert_eq!(to_i16(-1.0), -32767);
        assert_eq!(to_u16(-3.0), 0);
        assert_eq!(to_u16(1.0), 65535);
        assert_eq!(to_u16(0.0), 32767);
    }
}
