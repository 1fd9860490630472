//! Headless rendering host.
//!
//! Runs a [`SignalGraph`] on its own thread and writes interleaved output into
//! a lock-free sample ring. Rendering stalls while the ring is full, so whoever reads
//! it sets the pace, much like a sound card would. A stalled graph is still
//! kept idle-serviced so control messages are answered.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::block::{AudioBlock, StreamFormat};
use crate::graph::SignalGraph;
use crate::ring::SampleRing;

const IDLE: Duration = Duration::from_micros(200);

pub struct OfflineHost {
    format: StreamFormat,
    sink: Arc<SampleRing>,
    running: Arc<AtomicBool>,
    rendered: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl OfflineHost {
    /// Start rendering `graph`. `buffered_blocks` bounds how far rendering can
    /// run ahead of the reader.
    pub fn start(graph: SignalGraph, buffered_blocks: usize) -> Result<Self> {
        let format = graph.format();
        let block_len = format.block_frames * format.channels;
        let sink = Arc::new(SampleRing::with_capacity(block_len * buffered_blocks.max(1)));
        let running = Arc::new(AtomicBool::new(true));
        let rendered = Arc::new(AtomicU64::new(0));

        let worker = thread::Builder::new()
            .name("transpose-offline".into())
            .spawn({
                let sink = sink.clone();
                let running = running.clone();
                let rendered = rendered.clone();
                move || render_loop(graph, &sink, &running, &rendered)
            })
            .context("spawning offline render thread")?;

        log::info!(
            "offline host: {} Hz, {} ch, {}-frame quantum",
            format.sample_rate,
            format.channels,
            format.block_frames
        );
        Ok(Self { format, sink, running, rendered, worker: Some(worker) })
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Quanta rendered so far.
    pub fn blocks_rendered(&self) -> u64 {
        self.rendered.load(Ordering::Acquire)
    }

    /// Copy up to `out.len()` interleaved samples; returns how many.
    pub fn read(&self, out: &mut [f32]) -> usize {
        self.sink.pop_up_to(out)
    }

    /// Block until `out` is completely filled or `timeout` elapses. Returns
    /// the number of samples written.
    pub fn read_exact(&self, out: &mut [f32], timeout: Duration) -> usize {
        let deadline = std::time::Instant::now() + timeout;
        let mut filled = 0;
        while filled < out.len() {
            filled += self.sink.pop_up_to(&mut out[filled..]);
            if filled < out.len() {
                if std::time::Instant::now() >= deadline {
                    break;
                }
                thread::sleep(IDLE);
            }
        }
        filled
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("offline render thread panicked");
            }
        }
    }
}

impl Drop for OfflineHost {
    fn drop(&mut self) {
        self.stop();
    }
}

fn render_loop(mut graph: SignalGraph, sink: &SampleRing, running: &AtomicBool, rendered: &AtomicU64) {
    let format = graph.format();
    let mut block = AudioBlock::for_format(&format);
    let mut interleaved = vec![0.0f32; format.block_frames * format.channels];

    while running.load(Ordering::Acquire) {
        if sink.free() < interleaved.len() {
            graph.idle();
            thread::sleep(IDLE);
            continue;
        }
        graph.render(&mut block);
        block.write_interleaved(&mut interleaved);
        sink.push_slice(&interleaved);
        rendered.fetch_add(1, Ordering::AcqRel);
    }
}
