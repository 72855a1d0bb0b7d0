//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur during capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Capture source not found.
    #[error("Capture source not found: {0}")]
    SourceNotFound(String),

    /// Audio device not found.
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// The source is already bound to an encoder input.
    #[error("Capture already bound")]
    AlreadyBound,

    /// The source has not been bound yet.
    #[error("Capture not bound")]
    NotBound,

    /// The encoder input went away while capture was still delivering.
    #[error("Encoder input closed")]
    SurfaceClosed,

    /// Frame data did not match the surface geometry.
    #[error("Frame conversion error: {0}")]
    FrameConversion(String),

    /// The capture thread could not be spawned.
    #[error("Capture thread failed: {0}")]
    Thread(String),

    /// The projection was already stopped.
    #[error("Projection already stopped")]
    ProjectionStopped,
}
