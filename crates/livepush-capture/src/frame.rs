//! Raw frame and sample types delivered to encoder inputs.

use std::time::Instant;

use bytes::Bytes;

/// Monotonic clock producing presentation timestamps in microseconds.
#[derive(Debug, Clone, Copy)]
pub struct CaptureClock {
    start: Instant,
}

impl CaptureClock {
    /// Start a clock at the current instant.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Microseconds elapsed since the clock started.
    pub fn now_us(&self) -> i64 {
        i64::try_from(self.start.elapsed().as_micros()).unwrap_or(i64::MAX)
    }
}

/// Calculate expected NV12 buffer size for given dimensions.
pub fn nv12_buffer_size(width: u32, height: u32) -> usize {
    // NV12: Y plane (width * height) + UV plane (width * height / 2)
    let y_size = width as usize * height as usize;
    y_size + y_size / 2
}

/// A raw video frame.
#[derive(Debug, Clone)]
pub struct RawVideoFrame {
    /// NV12 pixel data.
    pub data: Bytes,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Presentation timestamp in microseconds.
    pub pts_us: i64,

    /// Monotonically increasing sequence number.
    pub sequence: u64,
}

impl RawVideoFrame {
    /// Validate that the frame data matches its dimensions.
    pub fn is_valid(&self) -> bool {
        self.data.len() == nv12_buffer_size(self.width, self.height)
    }
}

/// A chunk of raw interleaved f32 audio samples.
#[derive(Debug, Clone)]
pub struct RawAudioChunk {
    /// Interleaved samples in [-1.0, 1.0].
    pub samples: Vec<f32>,

    /// Number of interleaved channels.
    pub channels: u16,

    /// Presentation timestamp of the first sample in microseconds.
    pub pts_us: i64,

    /// Monotonically increasing sequence number.
    pub sequence: u64,
}

impl RawAudioChunk {
    /// Number of sample frames (samples per channel) in this chunk.
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}
