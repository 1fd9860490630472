use std::time::Duration;

use thiserror::Error;

/// Failures of the control-side initialization handshake.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("an initialization is already in flight")]
    AlreadyInitializing,
    #[error("processor did not acknowledge init within {0:?}")]
    Timeout(Duration),
    #[error("processor failed to load: {0}")]
    Failure(#[from] HostError),
    #[error("could not reach processor: {0}")]
    Message(#[from] MessageError),
    #[error("initialization cancelled by teardown")]
    Cancelled,
}

/// Errors raised by a rendering context when editing the signal graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("graph command queue is full")]
    QueueFull,
    #[error("rendering context does not support block processors")]
    Unsupported,
    #[error("processor format {got:?} does not match stream ({expected:?})")]
    FormatMismatch { expected: (usize, usize), got: (usize, usize) },
}

/// Errors posting to, or decoding for, the processor's inbound queue.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("processor message queue is full")]
    QueueFull,
    #[error("malformed processor message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("no source registered for `{0}`")]
    UnknownSource(String),
    #[error("clip is {clip} Hz but the stream runs at {stream} Hz")]
    SampleRateMismatch { clip: u32, stream: u32 },
    #[error("clip has {samples} samples, not a multiple of {channels} channels")]
    RaggedClip { samples: usize, channels: usize },
    #[error("invalid seek position {0}")]
    InvalidSeek(f64),
    #[error("invalid playback rate {0}")]
    InvalidRate(f32),
    #[error("transport command queue is full")]
    QueueFull,
}

/// Algorithm-internal failure during one block. Copy so the render thread can
/// report it without allocating.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingFault {
    #[error("input buffer overflow")]
    InputOverflow,
    #[error("non-finite sample produced")]
    NonFinite,
    #[error("block shape does not match the processor format")]
    ShapeMismatch,
}
