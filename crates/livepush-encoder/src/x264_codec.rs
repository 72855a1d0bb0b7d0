//! H.264 codec backed by x264.

use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, instrument, trace, warn};

use livepush_capture::{InputSurface, RawVideoFrame};

use crate::codec::{BufferFlags, Codec, CodecResult, PollResult};
use crate::error::CodecError;
use crate::format::{keys, MediaFormat, MIME_VIDEO_AVC};
use crate::nal::split_parameter_sets;
use crate::software::{CodecState, OutputPool, OUTPUT_SLOTS};

#[derive(Debug, Clone, Copy)]
struct VideoParams {
    width: u32,
    height: u32,
    fps: u32,
    bitrate_kbps: u32,
    keyframe_interval: u32,
}

impl VideoParams {
    fn from_format(format: &MediaFormat) -> CodecResult<Self> {
        let read = |key: &'static str| {
            format
                .integer(key)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or(CodecError::InvalidState("video format is missing a required key"))
        };

        let fps = read(keys::FRAME_RATE)?.max(1);
        let interval_secs = format
            .integer(keys::I_FRAME_INTERVAL)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(2);

        Ok(Self {
            width: read(keys::WIDTH)?,
            height: read(keys::HEIGHT)?,
            fps,
            bitrate_kbps: (read(keys::BIT_RATE)? / 1000).max(1),
            keyframe_interval: fps.saturating_mul(interval_secs).max(1),
        })
    }

    fn to_encoder_units(self, timestamp_us: i64) -> i64 {
        timestamp_us.saturating_mul(i64::from(self.fps)) / 1_000_000
    }

    fn to_micros(self, pts: i64) -> i64 {
        pts.saturating_mul(1_000_000) / i64::from(self.fps)
    }
}

/// Software H.264 encoder.
///
/// Frames arrive through the input surface; every dequeue waits for at
/// most one frame, encodes it and offers the result as a slot.
pub struct X264Codec {
    state: CodecState,
    params: Option<VideoParams>,
    encoder: Option<x264::Encoder>,
    frames: Option<Receiver<RawVideoFrame>>,
    output_format: MediaFormat,
    format_pending: bool,
    end_of_stream: bool,
    pool: OutputPool,
}

impl X264Codec {
    pub fn new() -> Self {
        Self {
            state: CodecState::Uninitialized,
            params: None,
            encoder: None,
            frames: None,
            output_format: MediaFormat::new(),
            format_pending: false,
            end_of_stream: false,
            pool: OutputPool::new(OUTPUT_SLOTS),
        }
    }

    fn encode(&mut self, frame: &RawVideoFrame) -> CodecResult<()> {
        let params = self.params.ok_or(CodecError::InvalidState("encode before configure"))?;
        if frame.width != params.width || frame.height != params.height || !frame.is_valid() {
            warn!(
                width = frame.width,
                height = frame.height,
                "Dropping frame with unexpected geometry"
            );
            return Ok(());
        }

        let y_size = params.width as usize * params.height as usize;
        let stride = params.width as i32;
        let image = x264::Image::new(
            x264::Colorspace::NV12,
            params.width as i32,
            params.height as i32,
            &[
                x264::Plane {
                    data: &frame.data[..y_size],
                    stride,
                },
                x264::Plane {
                    data: &frame.data[y_size..],
                    stride,
                },
            ],
        );

        let encoder = self
            .encoder
            .as_mut()
            .ok_or(CodecError::InvalidState("encode before start"))?;
        let (data, picture) = encoder
            .encode(params.to_encoder_units(frame.pts_us), image)
            .map_err(|e| CodecError::Failed(format!("x264 encode failed: {:?}", e)))?;

        // An empty result means the frame is buffered inside x264.
        if data.len() == 0 {
            return Ok(());
        }

        let payload = Bytes::copy_from_slice(data.entirety());
        let flags = if picture.keyframe() {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::NONE
        };
        let timestamp_us = params.to_micros(picture.pts());

        trace!(sequence = frame.sequence, bytes = payload.len(), ?flags, "Encoded frame");
        self.pool.enqueue(payload, timestamp_us, flags);
        Ok(())
    }

    /// Flush delayed frames and queue the end-of-stream slot.
    fn drain(&mut self) {
        let params = self.params;
        if let (Some(encoder), Some(params)) = (self.encoder.take(), params) {
            let mut flush = encoder.flush();
            loop {
                match flush.next() {
                    Some(Ok((data, picture))) => {
                        if data.len() > 0 {
                            let flags = if picture.keyframe() {
                                BufferFlags::KEY_FRAME
                            } else {
                                BufferFlags::NONE
                            };
                            self.pool.enqueue(
                                Bytes::copy_from_slice(data.entirety()),
                                params.to_micros(picture.pts()),
                                flags,
                            );
                        }
                    }
                    Some(Err(e)) => {
                        debug!("x264 flush ended: {:?}", e);
                        break;
                    }
                    None => break,
                }
            }
        }

        self.pool.enqueue(Bytes::new(), 0, BufferFlags::END_OF_STREAM);
        self.end_of_stream = true;
        info!("Video input closed, end of stream queued");
    }
}

impl Default for X264Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for X264Codec {
    fn name(&self) -> &str {
        "x264"
    }

    fn configure(&mut self, format: &MediaFormat) -> CodecResult<()> {
        self.state.require(CodecState::Uninitialized, "configure")?;
        if format.mime() != Some(MIME_VIDEO_AVC) {
            return Err(CodecError::Unsupported("MIME types other than video/avc"));
        }
        self.params = Some(VideoParams::from_format(format)?);
        self.state = CodecState::Configured;
        Ok(())
    }

    fn create_input_surface(&mut self) -> CodecResult<InputSurface> {
        self.state.require(CodecState::Configured, "create_input_surface")?;
        let params = self.params.ok_or(CodecError::InvalidState("create_input_surface"))?;
        let (surface, frames) = InputSurface::new(params.width, params.height);
        self.frames = Some(frames);
        Ok(surface)
    }

    #[instrument(name = "x264_start", skip(self))]
    fn start(&mut self) -> CodecResult<()> {
        self.state.require(CodecState::Configured, "start")?;
        let params = self.params.ok_or(CodecError::InvalidState("start"))?;

        let mut encoder = x264::Setup::preset(x264::Preset::Veryfast, x264::Tune::None, false, true)
            .fps(params.fps, 1)
            .bitrate(params.bitrate_kbps as i32)
            .max_keyframe_interval(params.keyframe_interval as i32)
            .scenecut_threshold(0)
            .high()
            .build(
                x264::Colorspace::NV12,
                params.width as i32,
                params.height as i32,
            )
            .map_err(|e| CodecError::Failed(format!("x264 setup failed: {:?}", e)))?;

        let headers = encoder
            .headers()
            .map_err(|e| CodecError::Failed(format!("x264 headers failed: {:?}", e)))?;
        let (sps, pps) = split_parameter_sets(headers.entirety())
            .ok_or_else(|| CodecError::Failed("x264 produced no parameter sets".to_string()))?;

        let mut output_format = MediaFormat::video(MIME_VIDEO_AVC, params.width, params.height);
        output_format.set_bytes(keys::CSD_0, sps);
        output_format.set_bytes(keys::CSD_1, pps);

        debug!(
            width = params.width,
            height = params.height,
            fps = params.fps,
            bitrate_kbps = params.bitrate_kbps,
            keyframe_interval = params.keyframe_interval,
            "x264 encoder started"
        );

        self.output_format = output_format;
        self.encoder = Some(encoder);
        self.format_pending = true;
        self.state = CodecState::Running;
        Ok(())
    }

    fn dequeue_output(&mut self, timeout: Duration) -> CodecResult<PollResult> {
        self.state.require(CodecState::Running, "dequeue_output")?;

        if self.format_pending {
            self.format_pending = false;
            return Ok(PollResult::FormatChanged);
        }
        if let Some(slot) = self.pool.dequeue() {
            return Ok(PollResult::Slot(slot));
        }
        if self.end_of_stream {
            thread::sleep(timeout);
            return Ok(PollResult::TryAgainLater);
        }

        let received = match &self.frames {
            Some(frames) => frames.recv_timeout(timeout),
            None => return Err(CodecError::InvalidState("no input surface")),
        };
        match received {
            Ok(frame) => self.encode(&frame)?,
            Err(RecvTimeoutError::Timeout) => return Ok(PollResult::TryAgainLater),
            Err(RecvTimeoutError::Disconnected) => self.drain(),
        }

        Ok(self
            .pool
            .dequeue()
            .map_or(PollResult::TryAgainLater, PollResult::Slot))
    }

    fn output_buffer(&self, index: i32) -> Option<&[u8]> {
        self.pool.buffer(index)
    }

    fn output_format(&self) -> MediaFormat {
        self.output_format.clone()
    }

    fn release_output(&mut self, index: i32, _render: bool) -> CodecResult<()> {
        if self.state == CodecState::Released {
            return Err(CodecError::Released);
        }
        self.pool.release(index)
    }

    fn stop(&mut self) -> CodecResult<()> {
        self.state.require(CodecState::Running, "stop")?;
        self.state = CodecState::Stopped;
        self.frames = None;
        self.encoder = None;
        debug!("x264 encoder stopped");
        Ok(())
    }

    fn release(&mut self) {
        self.state = CodecState::Released;
        self.frames = None;
        self.encoder = None;
        self.pool.clear();
    }
}

// SAFETY: x264::Encoder holds raw pointers but is only ever driven from the
// thread that currently owns the codec.
unsafe impl Send for X264Codec {}
