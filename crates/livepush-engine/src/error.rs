//! Error types for the engine.

use thiserror::Error;

use livepush_capture::CaptureError;
use livepush_encoder::{EncoderConfigError, EncoderError};
use livepush_ipc::{SessionState, SinkError};

/// Errors raised while starting or driving a capture session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The encoder could not be configured.
    #[error("Encoder configuration failed: {0}")]
    Config(#[from] EncoderConfigError),

    /// The capture source could not be bound.
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// The encoder failed after configuration.
    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    /// The sink refused a lifecycle call.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// The encoder handed out an input of the wrong kind for the source.
    #[error("Encoder input does not match the capture source")]
    InputMismatch,

    /// The requested operation is not legal in the current state.
    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// The worker thread could not be spawned.
    #[error("Worker thread failed: {0}")]
    Thread(String),
}
