use rtrb::{Consumer, Producer, RingBuffer};

use crate::block::{AudioBlock, BlockSource, StreamFormat};
use crate::dsp::gain::Gain;
use crate::error::HostError;
use crate::processor::BlockProcessor;

/// What the engine controller needs from the host that runs audio rendering.
pub trait RenderContext {
    fn format(&self) -> StreamFormat;
    /// Whether real-time block processors can run in this host at all.
    fn supports_block_processors(&self) -> bool;
    /// Hand a processor to the render thread. It is serviced every block but
    /// carries audio only once routed.
    fn install_processor(&mut self, processor: BlockProcessor) -> Result<(), HostError>;
    /// Disconnect and release the installed processor. No-op if none.
    fn remove_processor(&mut self) -> Result<(), HostError>;
}

/// Which path audio takes between source and gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Source -> Gain -> Sink.
    Direct,
    /// Source -> Processor -> Gain -> Sink.
    Processed,
}

enum GraphCommand {
    Install(Box<BlockProcessor>),
    Remove,
    Route(Route),
    Volume(f32),
}

#[derive(Debug, Clone, Copy)]
pub struct GraphOptions {
    pub block_processors: bool,
    pub command_capacity: usize,
    pub volume: f32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self { block_processors: true, command_capacity: 64, volume: 1.0 }
    }
}

/// Build a graph around `source`. The handle stays on the control thread, the
/// graph moves to whatever drives rendering.
pub fn signal_graph(
    format: StreamFormat,
    source: Box<dyn BlockSource>,
    options: GraphOptions,
) -> (GraphHandle, SignalGraph) {
    let (cmd_tx, cmd_rx) = RingBuffer::new(options.command_capacity);
    let (retired_tx, retired_rx) = RingBuffer::new(4);
    let gain = Gain::new(options.volume);
    (
        GraphHandle {
            format,
            block_processors: options.block_processors,
            commands: cmd_tx,
            retired: retired_rx,
            route: Route::Direct,
            installed: false,
            volume: gain.level(),
        },
        SignalGraph {
            format,
            source,
            processor: None,
            route: Route::Direct,
            gain,
            commands: cmd_rx,
            retired: retired_tx,
        },
    )
}

/// Render side: Source -> [Processor] -> Gain. Edits arrive as commands and
/// take effect only between blocks.
pub struct SignalGraph {
    format: StreamFormat,
    source: Box<dyn BlockSource>,
    processor: Option<Box<BlockProcessor>>,
    route: Route,
    gain: Gain,
    commands: Consumer<GraphCommand>,
    retired: Producer<Box<BlockProcessor>>,
}

impl SignalGraph {
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Route audio is actually taking. `Processed` without a processor falls
    /// back to `Direct`, so exactly one path is ever connected.
    pub fn route(&self) -> Route {
        match (self.route, &self.processor) {
            (Route::Processed, Some(_)) => Route::Processed,
            _ => Route::Direct,
        }
    }

    /// Render one quantum into `out`.
    pub fn render(&mut self, out: &mut AudioBlock) {
        self.apply_commands();
        match (self.route, self.processor.as_deref_mut()) {
            (Route::Processed, Some(processor)) => processor.render(self.source.as_mut(), out),
            (_, idle) => {
                if let Some(processor) = idle {
                    processor.service();
                }
                self.source.pull(out);
            }
        }
        self.gain.process(out);
    }

    /// Between-block housekeeping for a host that is not pulling audio right
    /// now: apply graph edits and let an installed processor drain messages.
    pub fn idle(&mut self) {
        self.apply_commands();
        if let Some(processor) = self.processor.as_deref_mut() {
            processor.service();
        }
    }

    fn apply_commands(&mut self) {
        loop {
            // Replacing or removing a processor needs room to hand it back.
            let edit_blocked = self.processor.is_some() && self.retired.is_full();
            if edit_blocked
                && matches!(self.commands.peek(), Ok(GraphCommand::Install(_) | GraphCommand::Remove))
            {
                return;
            }
            let Ok(cmd) = self.commands.pop() else { return };
            match cmd {
                GraphCommand::Install(processor) => {
                    if let Some(old) = self.processor.replace(processor) {
                        self.retire(old);
                    }
                }
                GraphCommand::Remove => {
                    if let Some(old) = self.processor.take() {
                        self.retire(old);
                    }
                    self.route = Route::Direct;
                }
                GraphCommand::Route(route) => self.route = route,
                GraphCommand::Volume(level) => self.gain.set_level(level),
            }
        }
    }

    fn retire(&mut self, processor: Box<BlockProcessor>) {
        // Freed on the control thread.
        let returned = self.retired.push(processor);
        debug_assert!(returned.is_ok());
    }
}

/// Control side of a [`SignalGraph`].
pub struct GraphHandle {
    format: StreamFormat,
    block_processors: bool,
    commands: Producer<GraphCommand>,
    retired: Consumer<Box<BlockProcessor>>,
    route: Route,
    installed: bool,
    volume: f32,
}

impl GraphHandle {
    fn send(&mut self, cmd: GraphCommand) -> Result<(), HostError> {
        self.collect_retired();
        self.commands.push(cmd).map_err(|_| HostError::QueueFull)
    }

    pub fn route(&self) -> Route {
        if self.installed { self.route } else { Route::Direct }
    }

    pub fn set_route(&mut self, route: Route) -> Result<(), HostError> {
        if route == self.route {
            return Ok(());
        }
        self.send(GraphCommand::Route(route))?;
        self.route = route;
        Ok(())
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, level: f32) -> Result<(), HostError> {
        self.send(GraphCommand::Volume(level))?;
        self.volume = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        Ok(())
    }

    pub fn has_processor(&self) -> bool {
        self.installed
    }

    /// Drop processors the render thread has let go of. Returns how many.
    pub fn collect_retired(&mut self) -> usize {
        let mut n = 0;
        while let Ok(processor) = self.retired.pop() {
            drop(processor);
            n += 1;
        }
        n
    }
}

impl RenderContext for GraphHandle {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn supports_block_processors(&self) -> bool {
        self.block_processors
    }

    fn install_processor(&mut self, processor: BlockProcessor) -> Result<(), HostError> {
        if !self.block_processors {
            return Err(HostError::Unsupported);
        }
        let got = processor.format();
        if got.channels != self.format.channels || got.block_frames != self.format.block_frames {
            return Err(HostError::FormatMismatch {
                expected: (self.format.channels, self.format.block_frames),
                got: (got.channels, got.block_frames),
            });
        }
        self.send(GraphCommand::Install(Box::new(processor)))?;
        self.installed = true;
        Ok(())
    }

    fn remove_processor(&mut self) -> Result<(), HostError> {
        if !self.installed {
            return Ok(());
        }
        self.send(GraphCommand::Remove)?;
        self.installed = false;
        self.route = Route::Direct;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{message_channel, InitConfig, ProcessorEvent, ProcessorMessage};

    struct Dc(f32);

    impl BlockSource for Dc {
        fn pull(&mut self, block: &mut AudioBlock) {
            for ch in 0..block.channels() {
                block.channel_mut(ch).fill(self.0);
            }
        }
    }

    fn format() -> StreamFormat {
        StreamFormat { sample_rate: 48_000, channels: 2, block_frames: 64 }
    }

    fn graph(options: GraphOptions) -> (GraphHandle, SignalGraph) {
        signal_graph(format(), Box::new(Dc(0.5)), options)
    }

    #[test]
    fn direct_route_plays_source_through_gain() {
        let (_handle, mut g) = graph(GraphOptions { volume: 0.5, ..Default::default() });
        let mut out = AudioBlock::for_format(&format());
        g.render(&mut out);
        assert!(out.samples().iter().all(|&s| s == 0.25));
        assert_eq!(g.route(), Route::Direct);
    }

    #[test]
    fn installed_processor_handshakes_before_it_is_routed() {
        let (mut handle, mut g) = graph(GraphOptions::default());
        let (mut port, endpoint) = message_channel(8);
        handle.install_processor(BlockProcessor::new(format(), endpoint)).unwrap();
        port.post(ProcessorMessage::Init(InitConfig::default())).unwrap();

        let mut out = AudioBlock::for_format(&format());
        g.render(&mut out);
        assert_eq!(port.try_recv(), Some(ProcessorEvent::Initialized));
        // Still direct: the source is heard untouched.
        assert!(out.samples().iter().all(|&s| s == 0.5));
        assert_eq!(g.route(), Route::Direct);

        handle.set_route(Route::Processed).unwrap();
        g.render(&mut out);
        assert_eq!(g.route(), Route::Processed);
        assert!(out.samples().iter().all(|&s| s == 0.5));
    }

    #[test]
    fn processed_route_without_processor_stays_direct() {
        let (mut handle, mut g) = graph(GraphOptions::default());
        handle.set_route(Route::Processed).unwrap();
        let mut out = AudioBlock::for_format(&format());
        g.render(&mut out);
        assert_eq!(g.route(), Route::Direct);
        assert_eq!(handle.route(), Route::Direct);
        assert!(!out.is_silent());
    }

    #[test]
    fn removal_reroutes_and_hands_processor_back() {
        let (mut handle, mut g) = graph(GraphOptions::default());
        let (_port, endpoint) = message_channel(8);
        handle.install_processor(BlockProcessor::new(format(), endpoint)).unwrap();
        handle.set_route(Route::Processed).unwrap();
        let mut out = AudioBlock::for_format(&format());
        g.render(&mut out);
        // Uninitialized processor on the path: silence.
        assert!(out.is_silent());

        handle.remove_processor().unwrap();
        handle.remove_processor().unwrap();
        g.render(&mut out);
        assert_eq!(g.route(), Route::Direct);
        assert!(!out.is_silent());
        assert_eq!(handle.collect_retired(), 1);
        assert!(!handle.has_processor());
    }

    #[test]
    fn removal_waits_while_the_return_queue_is_full() {
        let (mut handle, mut g) = graph(GraphOptions::default());
        let (_port, endpoint) = message_channel(8);
        handle.install_processor(BlockProcessor::new(format(), endpoint)).unwrap();
        let mut out = AudioBlock::for_format(&format());
        g.render(&mut out);

        handle.remove_processor().unwrap();
        // Nothing collected on the control side yet.
        loop {
            let (_port, endpoint) = message_channel(8);
            if g.retired.push(Box::new(BlockProcessor::new(format(), endpoint))).is_err() {
                break;
            }
        }
        g.render(&mut out);
        assert!(g.processor.is_some());

        assert_eq!(handle.collect_retired(), 4);
        g.render(&mut out);
        assert!(g.processor.is_none());
        assert_eq!(handle.collect_retired(), 1);
    }

    #[test]
    fn unsupported_host_refuses_processors() {
        let (mut handle, _g) = graph(GraphOptions { block_processors: false, ..Default::default() });
        let (_port, endpoint) = message_channel(8);
        assert!(!handle.supports_block_processors());
        assert_eq!(
            handle.install_processor(BlockProcessor::new(format(), endpoint)),
            Err(HostError::Unsupported)
        );
    }

    #[test]
    fn processor_format_must_match_stream() {
        let (mut handle, _g) = graph(GraphOptions::default());
        let (_port, endpoint) = message_channel(8);
        let wrong = StreamFormat { channels: 1, ..format() };
        assert!(matches!(
            handle.install_processor(BlockProcessor::new(wrong, endpoint)),
            Err(HostError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn idle_graph_still_answers_init() {
        let (mut handle, mut g) = graph(GraphOptions::default());
        let (mut port, endpoint) = message_channel(8);
        handle.install_processor(BlockProcessor::new(format(), endpoint)).unwrap();
        port.post(ProcessorMessage::Init(InitConfig::default())).unwrap();
        g.idle();
        assert_eq!(port.try_recv(), Some(ProcessorEvent::Initialized));
    }

    #[test]
    fn volume_applies_at_next_block() {
        let (mut handle, mut g) = graph(GraphOptions::default());
        let mut out = AudioBlock::for_format(&format());
        handle.set_volume(0.0).unwrap();
        assert_eq!(handle.volume(), 0.0);
        g.render(&mut out); // ramp block
        g.render(&mut out);
        assert!(out.is_silent());
    }
}
