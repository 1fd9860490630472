//! Control-thread owner of the block processor's lifecycle.
//!
//! `initialize` looks synchronous to the caller but is a handshake: install the
//! processor, post `init`, then wait (bounded) for the render thread to answer
//! `initialized`.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::InitError;
use crate::graph::RenderContext;
use crate::message::{message_channel, EngineEvent, InitConfig, ProcessorEvent, ProcessorMessage, ProcessorPort};
use crate::params::PitchTempoParameters;
use crate::processor::BlockProcessor;

const HANDSHAKE_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unstarted,
    Initializing,
    Ready,
    Degraded,
    Failed,
}

/// Successful outcomes of `initialize`. Failures come back as [`InitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Ready,
    /// Real-time processing is unavailable in this host; pitch control is off.
    Degraded,
}

/// The processor as seen from the control thread.
enum Slot {
    Absent,
    /// Handshake in flight, tagged with the attempt that started it.
    Initializing(u64),
    Active(ProcessorPort),
    Unavailable,
    Failed,
}

struct Inner {
    slot: Slot,
    /// Bumped by every initialization attempt.
    generation: u64,
    params: PitchTempoParameters,
    events: VecDeque<EngineEvent>,
}

pub struct EngineController {
    inner: Mutex<Inner>,
    timeout: Duration,
    queue_capacity: usize,
}

impl EngineController {
    pub fn new(timeout: Duration, queue_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slot: Slot::Absent,
                generation: 0,
                params: PitchTempoParameters::default(),
                events: VecDeque::new(),
            }),
            timeout,
            queue_capacity: queue_capacity.max(4),
        }
    }

    pub fn state(&self) -> EngineState {
        match self.inner.lock().slot {
            Slot::Absent => EngineState::Unstarted,
            Slot::Initializing(_) => EngineState::Initializing,
            Slot::Active(_) => EngineState::Ready,
            Slot::Unavailable => EngineState::Degraded,
            Slot::Failed => EngineState::Failed,
        }
    }

    /// Last requested parameters, kept regardless of state and re-sent after
    /// every successful initialization.
    pub fn parameters(&self) -> PitchTempoParameters {
        self.inner.lock().params
    }

    /// Bring the processor up in `ctx`.
    ///
    /// Ready and Degraded are sticky: calling again returns the same outcome
    /// until `teardown`. A Failed controller may be retried.
    pub fn initialize(&self, ctx: &mut dyn RenderContext) -> Result<InitOutcome, InitError> {
        let attempt = {
            let mut inner = self.inner.lock();
            match inner.slot {
                Slot::Initializing(_) => return Err(InitError::AlreadyInitializing),
                Slot::Active(_) => return Ok(InitOutcome::Ready),
                Slot::Unavailable => return Ok(InitOutcome::Degraded),
                Slot::Absent | Slot::Failed => {}
            }
            if !ctx.supports_block_processors() {
                log::warn!("real-time block processing unsupported; pitch control disabled");
                inner.slot = Slot::Unavailable;
                inner.events.push_back(EngineEvent::Degraded { reason: "unsupported environment".into() });
                return Ok(InitOutcome::Degraded);
            }
            inner.generation += 1;
            inner.slot = Slot::Initializing(inner.generation);
            inner.generation
        };

        // The lock is released while waiting so state() and a competing
        // initialize() can observe Initializing.
        let result = self.handshake(ctx);

        let mut inner = self.inner.lock();
        match inner.slot {
            Slot::Initializing(current) if current == attempt => {}
            Slot::Absent => {
                // Torn down while we were waiting.
                if let Err(e) = ctx.remove_processor() {
                    log::warn!("could not remove processor after cancelled init: {e}");
                }
                return Err(InitError::Cancelled);
            }
            // Torn down and initialized again: the processor belongs to the newer attempt.
            _ => return Err(InitError::Cancelled),
        }
        match result {
            Ok(mut port) => {
                let params = inner.params;
                for msg in [ProcessorMessage::SetPitch(params.semitones()), ProcessorMessage::SetTempo(params.tempo())] {
                    if let Err(e) = port.post(msg) {
                        log::warn!("could not reapply {msg:?}: {e}");
                    }
                }
                inner.slot = Slot::Active(port);
                inner.events.push_back(EngineEvent::Initialized);
                log::info!("block processor initialized");
                Ok(InitOutcome::Ready)
            }
            Err(e) => {
                if let Err(remove) = ctx.remove_processor() {
                    log::warn!("could not remove processor after failed init: {remove}");
                }
                inner.slot = Slot::Failed;
                log::error!("block processor initialization failed: {e}");
                Err(e)
            }
        }
    }

    fn handshake(&self, ctx: &mut dyn RenderContext) -> Result<ProcessorPort, InitError> {
        let (mut port, endpoint) = message_channel(self.queue_capacity);
        ctx.install_processor(BlockProcessor::new(ctx.format(), endpoint))?;
        port.post(ProcessorMessage::Init(InitConfig::default()))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            while let Some(ev) = port.try_recv() {
                match ev {
                    ProcessorEvent::Initialized => return Ok(port),
                    other => log::debug!("ignoring {other:?} during handshake"),
                }
            }
            if Instant::now() >= deadline {
                return Err(InitError::Timeout(self.timeout));
            }
            thread::sleep(HANDSHAKE_POLL);
        }
    }

    /// Clamp to [-12, 12] and send when Ready. Returns whether the processor
    /// was told; in any other state this is a no-op apart from the mirror.
    pub fn set_pitch_semitones(&self, semitones: f32) -> bool {
        let mut inner = self.inner.lock();
        if !inner.params.set_semitones(semitones) {
            log::warn!("ignoring non-numeric pitch {semitones}");
            return false;
        }
        if inner.params.semitones() != semitones {
            log::debug!("pitch {semitones} clamped to {}", inner.params.semitones());
        }
        let msg = ProcessorMessage::SetPitch(inner.params.semitones());
        Self::send(&mut inner, msg)
    }

    /// Clamp to [0.5, 2.0] and send when Ready. When Degraded the caller must
    /// drive the transport's native rate instead.
    pub fn set_tempo_ratio(&self, ratio: f32) -> bool {
        let mut inner = self.inner.lock();
        if !inner.params.set_tempo(ratio) {
            log::warn!("ignoring non-numeric tempo {ratio}");
            return false;
        }
        if inner.params.tempo() != ratio {
            log::debug!("tempo {ratio} clamped to {}", inner.params.tempo());
        }
        let msg = ProcessorMessage::SetTempo(inner.params.tempo());
        Self::send(&mut inner, msg)
    }

    /// Apply a message in wire format. Parameter messages go through the same
    /// clamping and state checks as the typed setters; malformed input is
    /// logged and dropped.
    pub fn post_json(&self, text: &str) -> bool {
        match ProcessorMessage::from_json(text) {
            Ok(ProcessorMessage::SetPitch(v)) => self.set_pitch_semitones(v),
            Ok(ProcessorMessage::SetTempo(v)) => self.set_tempo_ratio(v),
            Ok(msg @ ProcessorMessage::Init(_)) => {
                let mut inner = self.inner.lock();
                Self::send(&mut inner, msg)
            }
            Err(e) => {
                log::warn!("dropping processor message: {e}");
                false
            }
        }
    }

    fn send(inner: &mut Inner, msg: ProcessorMessage) -> bool {
        match &mut inner.slot {
            Slot::Active(port) => match port.post(msg) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("dropping {msg:?}: {e}");
                    false
                }
            },
            _ => false,
        }
    }

    /// Disconnect and release the processor. Safe from any state, repeatable.
    pub fn teardown(&self, ctx: &mut dyn RenderContext) {
        let mut inner = self.inner.lock();
        let was_active = matches!(inner.slot, Slot::Active(_) | Slot::Initializing(_));
        if was_active {
            if let Err(e) = ctx.remove_processor() {
                log::warn!("processor removal failed: {e}");
            }
            log::info!("block processor torn down");
        }
        inner.slot = Slot::Absent;
    }

    /// Remove a Ready processor for good and report Degraded from now on.
    /// Used by the orchestrator when faults persist.
    pub fn degrade(&self, ctx: &mut dyn RenderContext, reason: &str) {
        let mut inner = self.inner.lock();
        if matches!(inner.slot, Slot::Unavailable) {
            return;
        }
        if let Err(e) = ctx.remove_processor() {
            log::warn!("processor removal failed: {e}");
        }
        log::warn!("disabling block processor: {reason}");
        inner.slot = Slot::Unavailable;
        inner.events.push_back(EngineEvent::Degraded { reason: reason.to_string() });
    }

    /// Collect pending diagnostics, including anything the render thread has
    /// reported since the last call.
    pub fn drain_events(&self) -> Vec<EngineEvent> {
        let mut inner = self.inner.lock();
        let mut from_render = Vec::new();
        if let Slot::Active(port) = &mut inner.slot {
            while let Some(ev) = port.try_recv() {
                from_render.push(ev);
            }
        }
        for ev in from_render {
            match ev {
                ProcessorEvent::Fault(fault) => log::warn!("processing fault: {fault}"),
                ProcessorEvent::Initialized => log::debug!("processor re-acknowledged init"),
            }
            inner.events.push_back(ev.into());
        }
        inner.events.drain(..).collect()
    }
}
