//! Cross-context protocol between the controller and the block processor.
//!
//! Control -> render: [`ProcessorMessage`], JSON shape `{"type": "setPitch", "value": 3.0}`.
//! Render -> control: [`ProcessorEvent`], surfaced to callers as [`EngineEvent`]
//! (`{"type": "initialized"}`, `{"type": "processingError", "detail": ..}`, ...).

use rtrb::{Consumer, Producer, RingBuffer};
use serde::{Deserialize, Serialize};

use crate::error::{MessageError, ProcessingFault};

/// Configuration carried by `init`. Currently empty on the wire (`{}`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InitConfig {}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ProcessorMessage {
    Init(InitConfig),
    SetPitch(f32),
    SetTempo(f32),
}

impl ProcessorMessage {
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> String {
        // A tagged enum of plain numbers always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// What the render thread reports back. Never allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorEvent {
    Initialized,
    Fault(ProcessingFault),
}

/// Diagnostic stream exposed to the orchestrator and UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    Initialized,
    ProcessingError { detail: String },
    Degraded { reason: String },
}

impl EngineEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<ProcessorEvent> for EngineEvent {
    fn from(ev: ProcessorEvent) -> Self {
        match ev {
            ProcessorEvent::Initialized => EngineEvent::Initialized,
            ProcessorEvent::Fault(fault) => EngineEvent::ProcessingError { detail: fault.to_string() },
        }
    }
}

/// Control-side end of a processor's message channel.
pub struct ProcessorPort {
    tx: Producer<ProcessorMessage>,
    rx: Consumer<ProcessorEvent>,
}

/// Render-side end, owned by the block processor.
pub struct ProcessorEndpoint {
    rx: Consumer<ProcessorMessage>,
    tx: Producer<ProcessorEvent>,
}

pub fn message_channel(capacity: usize) -> (ProcessorPort, ProcessorEndpoint) {
    let (msg_tx, msg_rx) = RingBuffer::new(capacity);
    let (ev_tx, ev_rx) = RingBuffer::new(capacity);
    (
        ProcessorPort { tx: msg_tx, rx: ev_rx },
        ProcessorEndpoint { rx: msg_rx, tx: ev_tx },
    )
}

impl ProcessorPort {
    pub fn post(&mut self, msg: ProcessorMessage) -> Result<(), MessageError> {
        self.tx.push(msg).map_err(|_| MessageError::QueueFull)
    }

    /// Decode a wire message and post it. Malformed or unknown messages never
    /// reach the processor.
    pub fn post_json(&mut self, text: &str) -> Result<(), MessageError> {
        let msg = ProcessorMessage::from_json(text)?;
        self.post(msg)
    }

    pub fn try_recv(&mut self) -> Option<ProcessorEvent> {
        self.rx.pop().ok()
    }
}

impl ProcessorEndpoint {
    #[inline]
    pub fn try_recv(&mut self) -> Option<ProcessorMessage> {
        self.rx.pop().ok()
    }

    /// Fire-and-forget; a full queue drops the event.
    #[inline]
    pub fn send(&mut self, ev: ProcessorEvent) {
        let _ = self.tx.push(ev);
    }
}
