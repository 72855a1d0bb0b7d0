//! Capture-side contracts for the livepush pipeline.
//!
//! The platform capture primitives (virtual displays, microphones, the
//! projection a display capture depends on) live outside this workspace.
//! This crate defines the narrow interface the pipeline uses to bind them to
//! an encoder's input side, plus synthetic sources that deliver a test
//! pattern and a tone through the same interface.

mod device;
mod error;
mod frame;
mod pattern;
mod surface;
mod synthetic;

pub use device::{find_device_by_id, synthetic_devices, TONE_DEVICE_ID};
pub use error::CaptureError;
pub use frame::{nv12_buffer_size, CaptureClock, RawAudioChunk, RawVideoFrame};
pub use pattern::{bgra_to_nv12, color_bars_bgra};
pub use surface::{InputSurface, SampleQueue};
pub use synthetic::{NullProjection, TestPatternDisplay, ToneMicrophone};

use livepush_ipc::AudioDevice;

/// Channel capacity for raw video frames waiting at an encoder input.
pub const FRAME_CHANNEL_CAPACITY: usize = 3;

/// Channel capacity for raw audio chunks waiting at an encoder input.
pub const AUDIO_CHANNEL_CAPACITY: usize = 8;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// A live video source that renders into an encoder's input surface.
pub trait VideoCapture: Send {
    /// Bind the source to `surface` and start delivering frames.
    fn bind(&mut self, surface: InputSurface, dpi: u32) -> CaptureResult<()>;

    /// Check if the source is currently bound.
    fn is_bound(&self) -> bool;

    /// Stop delivering frames and drop the surface binding.
    fn release(&mut self) -> CaptureResult<()>;
}

/// A live audio source that feeds an encoder's input queue.
pub trait AudioCapture: Send {
    /// Enumerate the input devices this source can capture from.
    fn devices(&self) -> CaptureResult<Vec<AudioDevice>>;

    /// Select an input device; `None` selects the default device.
    fn select_device(&mut self, id: Option<&str>) -> CaptureResult<()>;

    /// Start delivering samples into `queue`.
    fn start(&mut self, queue: SampleQueue) -> CaptureResult<()>;

    /// Check if capture is active.
    fn is_active(&self) -> bool;

    /// Stop capturing and drop the queue.
    fn release(&mut self) -> CaptureResult<()>;
}

/// The platform session a display capture depends on.
pub trait Projection: Send {
    /// Stop the projection. Called once, after the display was released.
    fn stop(&mut self) -> CaptureResult<()>;
}
