pub mod block;
pub mod controller;
pub mod devices;
pub mod dsp;
pub mod error;
pub mod graph;
pub mod message;
pub mod offline;
pub mod output;
pub mod params;
pub mod player;
pub mod processor;
mod ring;
pub mod transport;

use std::time::Duration;

pub use block::{AudioBlock, BlockSource, StreamFormat};
pub use controller::{EngineController, EngineState, InitOutcome};
pub use error::{HostError, InitError, MessageError, ProcessingFault, TransportError};
pub use graph::{signal_graph, GraphHandle, GraphOptions, RenderContext, Route, SignalGraph};
pub use message::{EngineEvent, ProcessorMessage};
pub use offline::OfflineHost;
pub use output::CpalHost;
pub use params::{pitch_ratio, PitchTempoParameters};
pub use player::{InitReport, Player};
pub use transport::{PcmClip, PcmTransport, Transport};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub output_name: Option<String>,      // match by substring (case-insensitive)
    pub output_index: Option<usize>,      // explicit index from device list
    pub sample_rate: Option<u32>,         // e.g., 48000; device default if None
    pub channels: Option<u16>,
    pub block_frames: usize,              // render quantum
    pub init_timeout: Duration,
    pub queue_capacity: usize,            // each control<->render queue
    pub volume: f32,                      // initial linear level, 0..=1
    pub realtime_processing: bool,        // false forces the native-rate fallback
    pub fault_threshold: usize,           // faults per poll before falling back; 0 disables
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_name: None,
            output_index: None,
            sample_rate: None,
            channels: None,
            block_frames: 128,
            init_timeout: Duration::from_secs(2),
            queue_capacity: 64,
            volume: 1.0,
            realtime_processing: true,
            fault_threshold: 8,
        }
    }
}

impl EngineConfig {
    /// Stream format for hosts that have no device to negotiate with.
    pub fn offline_format(&self) -> StreamFormat {
        let base = StreamFormat::default();
        StreamFormat {
            sample_rate: self.sample_rate.unwrap_or(base.sample_rate),
            channels: self.channels.map_or(base.channels, usize::from),
            block_frames: self.block_frames.max(1),
        }
    }
}
