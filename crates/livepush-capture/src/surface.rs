//! Encoder input handles that capture sources write into.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::trace;

use crate::error::CaptureError;
use crate::frame::{RawAudioChunk, RawVideoFrame};
use crate::{CaptureResult, AUDIO_CHANNEL_CAPACITY, FRAME_CHANNEL_CAPACITY};

/// The input side of a video encoder.
///
/// Created by the encoder and handed to a [`crate::VideoCapture`] when it is
/// bound. Frames are dropped, not queued, when the encoder falls behind.
#[derive(Debug, Clone)]
pub struct InputSurface {
    width: u32,
    height: u32,
    frames: Sender<RawVideoFrame>,
}

impl InputSurface {
    /// Create a surface and the receiver the encoder drains.
    pub fn new(width: u32, height: u32) -> (Self, Receiver<RawVideoFrame>) {
        let (frames, receiver) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);
        (
            Self {
                width,
                height,
                frames,
            },
            receiver,
        )
    }

    /// Surface dimensions in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Submit a frame. Returns `Ok(false)` if it was dropped on a full queue.
    pub fn submit(&self, frame: RawVideoFrame) -> CaptureResult<bool> {
        if frame.width != self.width || frame.height != self.height || !frame.is_valid() {
            return Err(CaptureError::FrameConversion(format!(
                "expected {}x{} NV12, got {}x{} ({} bytes)",
                self.width,
                self.height,
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        match self.frames.try_send(frame) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(frame)) => {
                trace!(sequence = frame.sequence, "Surface full, dropping frame");
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(CaptureError::SurfaceClosed),
        }
    }
}

/// The input side of an audio encoder.
#[derive(Debug, Clone)]
pub struct SampleQueue {
    sample_rate: u32,
    channels: u16,
    chunks: Sender<RawAudioChunk>,
}

impl SampleQueue {
    /// Create a queue and the receiver the encoder drains.
    pub fn new(sample_rate: u32, channels: u16) -> (Self, Receiver<RawAudioChunk>) {
        let (chunks, receiver) = crossbeam_channel::bounded(AUDIO_CHANNEL_CAPACITY);
        (
            Self {
                sample_rate,
                channels,
                chunks,
            },
            receiver,
        )
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Submit a chunk. Returns `Ok(false)` if it was dropped on a full queue.
    pub fn submit(&self, chunk: RawAudioChunk) -> CaptureResult<bool> {
        match self.chunks.try_send(chunk) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(chunk)) => {
                trace!(sequence = chunk.sequence, "Sample queue full, dropping chunk");
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(CaptureError::SurfaceClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(width: u32, height: u32, sequence: u64) -> RawVideoFrame {
        RawVideoFrame {
            data: Bytes::from(vec![0u8; crate::nv12_buffer_size(width, height)]),
            width,
            height,
            pts_us: sequence as i64 * 16_666,
            sequence,
        }
    }

    #[test]
    fn test_surface_drops_when_full() {
        let (surface, rx) = InputSurface::new(4, 2);
        for i in 0..FRAME_CHANNEL_CAPACITY as u64 {
            assert!(surface.submit(frame(4, 2, i)).unwrap());
        }
        assert!(!surface.submit(frame(4, 2, 99)).unwrap());
        assert_eq!(rx.len(), FRAME_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_surface_rejects_wrong_geometry() {
        let (surface, _rx) = InputSurface::new(4, 2);
        assert!(matches!(
            surface.submit(frame(8, 2, 0)),
            Err(CaptureError::FrameConversion(_))
        ));
    }

    #[test]
    fn test_surface_closed_after_encoder_drops_receiver() {
        let (surface, rx) = InputSurface::new(4, 2);
        drop(rx);
        assert!(matches!(
            surface.submit(frame(4, 2, 0)),
            Err(CaptureError::SurfaceClosed)
        ));
    }

    #[test]
    fn test_sample_queue_delivers() {
        let (queue, rx) = SampleQueue::new(44_100, 1);
        let chunk = RawAudioChunk {
            samples: vec![0.5; 441],
            channels: 1,
            pts_us: 0,
            sequence: 0,
        };
        assert!(queue.submit(chunk).unwrap());
        assert_eq!(rx.recv().unwrap().samples.len(), 441);
    }
}
