//! The playback orchestrator: the control surface a UI talks to.
//!
//! It owns the graph handle, the transport and the engine controller, and
//! picks the audio path from the controller's state:
//!
//! - Ready: Source -> Processor -> Gain, with independent pitch and tempo.
//! - Degraded / Failed: Source -> Gain. Pitch is a no-op and tempo falls back
//!   to the transport's native playback rate, which shifts pitch along with
//!   speed. That trade is deliberate and visible through [`Player::state`].

use crate::block::StreamFormat;
use crate::controller::{EngineController, EngineState, InitOutcome};
use crate::error::{HostError, InitError, TransportError};
use crate::graph::{signal_graph, GraphHandle, GraphOptions, Route, SignalGraph};
use crate::message::EngineEvent;
use crate::params::PitchTempoParameters;
use crate::transport::{pcm_transport, PcmTransport, Transport};
use crate::EngineConfig;

/// Result of [`Player::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitReport {
    /// Whether independent pitch and tempo control is available this session.
    pub supported: bool,
    pub state: EngineState,
}

pub struct Player<T: Transport = PcmTransport> {
    controller: EngineController,
    graph: GraphHandle,
    transport: T,
    fault_threshold: usize,
}

impl Player<PcmTransport> {
    /// Wire a [`PcmTransport`] into a fresh graph. The returned [`SignalGraph`]
    /// belongs to whichever host will render it.
    pub fn with_pcm(config: &EngineConfig, format: StreamFormat) -> (Self, SignalGraph) {
        let (transport, source) = pcm_transport(format, config.queue_capacity);
        let (graph, signal) = signal_graph(
            format,
            Box::new(source),
            GraphOptions {
                block_processors: config.realtime_processing,
                command_capacity: config.queue_capacity,
                volume: config.volume,
            },
        );
        (Self::new(config, graph, transport), signal)
    }
}

impl<T: Transport> Player<T> {
    pub fn new(config: &EngineConfig, graph: GraphHandle, transport: T) -> Self {
        Self {
            controller: EngineController::new(config.init_timeout, config.queue_capacity),
            graph,
            transport,
            fault_threshold: config.fault_threshold,
        }
    }

    /// Try to bring up real-time processing. Timeouts and load failures are
    /// logged and answered with the native fallback; only a concurrent
    /// initialization is an error. Repeat calls are harmless.
    pub fn init(&mut self) -> Result<InitReport, InitError> {
        match self.controller.initialize(&mut self.graph) {
            Ok(InitOutcome::Ready) => {
                self.use_processor();
            }
            Ok(InitOutcome::Degraded) => self.use_native_rate(),
            Err(InitError::AlreadyInitializing) => return Err(InitError::AlreadyInitializing),
            Err(e) => {
                log::warn!("pitch control unavailable ({e}); using native playback rate for tempo");
                self.use_native_rate();
            }
        }
        let state = self.controller.state();
        Ok(InitReport { supported: state == EngineState::Ready, state })
    }

    fn use_processor(&mut self) {
        if let Err(e) = self.graph.set_route(Route::Processed) {
            log::error!("could not route through processor: {e}");
            return;
        }
        if let Err(e) = self.transport.set_playback_rate(1.0) {
            log::warn!("could not reset playback rate: {e}");
        }
    }

    fn use_native_rate(&mut self) {
        if let Err(e) = self.graph.set_route(Route::Direct) {
            log::error!("could not route around processor: {e}");
        }
        let tempo = self.controller.parameters().tempo();
        if let Err(e) = self.transport.set_playback_rate(tempo) {
            log::warn!("could not apply native playback rate {tempo}: {e}");
        }
    }

    /// Shift pitch in semitones, clamped to [-12, 12]. Returns whether it took
    /// effect; without the real-time path this is a no-op.
    pub fn set_pitch(&mut self, semitones: f32) -> bool {
        let applied = self.controller.set_pitch_semitones(semitones);
        if !applied && self.controller.state() != EngineState::Ready {
            log::debug!("pitch {semitones} not applied: engine is {:?}", self.controller.state());
        }
        applied
    }

    /// Change tempo, clamped to [0.5, 2.0]. Without the real-time path the
    /// transport's native rate is used instead, so pitch moves too.
    pub fn set_tempo(&mut self, ratio: f32) -> Result<(), TransportError> {
        if self.controller.set_tempo_ratio(ratio) || self.controller.state() == EngineState::Ready {
            return Ok(());
        }
        self.transport.set_playback_rate(self.controller.parameters().tempo())
    }

    /// Accept a parameter message in wire format, e.g.
    /// `{"type": "setPitch", "value": 3}`. Returns whether it reached the
    /// processor.
    pub fn post_message(&mut self, json: &str) -> bool {
        self.controller.post_json(json)
    }

    pub fn set_volume(&mut self, level: f32) -> Result<(), HostError> {
        self.graph.set_volume(level)
    }

    pub fn volume(&self) -> f32 {
        self.graph.volume()
    }

    pub fn play(&mut self) -> Result<(), TransportError> {
        self.transport.play()
    }

    pub fn pause(&mut self) -> Result<(), TransportError> {
        self.transport.pause()
    }

    pub fn seek(&mut self, seconds: f64) -> Result<(), TransportError> {
        self.transport.seek(seconds)
    }

    pub fn load(&mut self, url: &str) -> Result<(), TransportError> {
        self.transport.load(url)
    }

    pub fn current_time(&self) -> f64 {
        self.transport.current_time()
    }

    pub fn duration(&self) -> Option<f64> {
        self.transport.duration()
    }

    pub fn state(&self) -> EngineState {
        self.controller.state()
    }

    pub fn parameters(&self) -> PitchTempoParameters {
        self.controller.parameters()
    }

    pub fn route(&self) -> Route {
        self.graph.route()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Drain diagnostics. When a single poll sees `fault_threshold` or more
    /// processing errors the processor is removed and playback continues on
    /// the native path.
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        self.graph.collect_retired();
        let mut events = self.controller.drain_events();
        let faults = events.iter().filter(|e| matches!(e, EngineEvent::ProcessingError { .. })).count();
        if self.fault_threshold > 0
            && faults >= self.fault_threshold
            && self.controller.state() == EngineState::Ready
        {
            self.controller.degrade(&mut self.graph, &format!("{faults} processing faults"));
            self.use_native_rate();
            events.extend(self.controller.drain_events());
        }
        events
    }

    /// Tear everything down. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        self.controller.teardown(&mut self.graph);
        if let Err(e) = self.graph.set_route(Route::Direct) {
            log::warn!("could not reset route: {e}");
        }
        if let Err(e) = self.transport.pause() {
            log::warn!("could not pause transport: {e}");
        }
        self.graph.collect_retired();
    }
}
