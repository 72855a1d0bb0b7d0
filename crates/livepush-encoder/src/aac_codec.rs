//! AAC-LC codec backed by fdk-aac.

use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, instrument, trace};

use livepush_capture::{RawAudioChunk, SampleQueue};

use crate::codec::{BufferFlags, Codec, CodecResult, PollResult};
use crate::config::AacProfile;
use crate::error::CodecError;
use crate::format::{keys, MediaFormat, MIME_AUDIO_AAC};
use crate::header::audio_specific_config;
use crate::software::{CodecState, OutputPool, OUTPUT_SLOTS};

/// Samples per channel in one AAC frame.
const AAC_FRAME_SAMPLES: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct AudioParams {
    sample_rate: u32,
    channels: u16,
    bitrate_bps: u32,
}

impl AudioParams {
    fn from_format(format: &MediaFormat) -> CodecResult<Self> {
        let profile = format.integer(keys::AAC_PROFILE).unwrap_or(2);
        if profile != i64::from(AacProfile::Lc.object_type()) {
            return Err(CodecError::Unsupported("AAC profiles other than LC"));
        }

        let sample_rate = format
            .integer(keys::SAMPLE_RATE)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or(CodecError::InvalidState("audio format has no sample rate"))?;
        let channels = format
            .integer(keys::CHANNEL_COUNT)
            .and_then(|v| u16::try_from(v).ok())
            .filter(|c| (1..=2).contains(c))
            .ok_or(CodecError::Unsupported("channel counts other than 1 or 2"))?;
        let bitrate_bps = format
            .integer(keys::BIT_RATE)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(128_000);

        Ok(Self {
            sample_rate,
            channels,
            bitrate_bps,
        })
    }

    fn samples_per_frame(self) -> usize {
        AAC_FRAME_SAMPLES * self.channels as usize
    }

    /// Timestamp of the `frame`th AAC frame after `base_us`.
    fn frame_timestamp(self, base_us: i64, frame: u64) -> i64 {
        let offset = frame * AAC_FRAME_SAMPLES as u64 * 1_000_000 / u64::from(self.sample_rate);
        base_us.saturating_add(offset as i64)
    }
}

/// Convert f32 samples to i16 for encoding.
fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

/// Software AAC-LC encoder producing raw access units.
pub struct AacCodec {
    state: CodecState,
    params: Option<AudioParams>,
    encoder: Option<fdk_aac::enc::Encoder>,
    samples: Option<Receiver<RawAudioChunk>>,
    pending: Vec<f32>,
    base_pts_us: Option<i64>,
    frames_out: u64,
    scratch: Vec<u8>,
    output_format: MediaFormat,
    format_pending: bool,
    end_of_stream: bool,
    pool: OutputPool,
}

impl AacCodec {
    pub fn new() -> Self {
        Self {
            state: CodecState::Uninitialized,
            params: None,
            encoder: None,
            samples: None,
            pending: Vec::new(),
            base_pts_us: None,
            frames_out: 0,
            scratch: Vec::new(),
            output_format: MediaFormat::new(),
            format_pending: false,
            end_of_stream: false,
            pool: OutputPool::new(OUTPUT_SLOTS),
        }
    }

    /// Encode one frame of interleaved samples.
    fn encode_frame(&mut self, params: AudioParams, frame: &[f32]) -> CodecResult<()> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or(CodecError::InvalidState("encode before start"))?;
        let pcm = f32_to_i16(frame);
        let encoded = encoder
            .encode(&pcm, &mut self.scratch)
            .map_err(|e| CodecError::Failed(format!("AAC encode failed: {:?}", e)))?;

        // Nothing yet while the encoder fills its look-ahead.
        if encoded.output_size == 0 {
            return Ok(());
        }

        let base = self.base_pts_us.unwrap_or(0);
        let timestamp_us = params.frame_timestamp(base, self.frames_out);
        self.frames_out += 1;

        let payload = Bytes::copy_from_slice(&self.scratch[..encoded.output_size]);
        trace!(bytes = payload.len(), timestamp_us, "Encoded AAC frame");
        self.pool.enqueue(payload, timestamp_us, BufferFlags::NONE);
        Ok(())
    }

    fn accept(&mut self, chunk: RawAudioChunk) -> CodecResult<()> {
        let params = self.params.ok_or(CodecError::InvalidState("encode before configure"))?;
        if self.base_pts_us.is_none() {
            self.base_pts_us = Some(chunk.pts_us);
        }
        self.pending.extend_from_slice(&chunk.samples);

        let frame_len = params.samples_per_frame();
        while self.pending.len() >= frame_len {
            let frame: Vec<f32> = self.pending.drain(..frame_len).collect();
            self.encode_frame(params, &frame)?;
        }
        Ok(())
    }

    /// Pad the remainder with silence, encode it and queue end of stream.
    fn drain(&mut self) -> CodecResult<()> {
        if let Some(params) = self.params {
            if !self.pending.is_empty() {
                let mut frame = std::mem::take(&mut self.pending);
                frame.resize(params.samples_per_frame(), 0.0);
                self.encode_frame(params, &frame)?;
            }
        }

        self.pool.enqueue(Bytes::new(), 0, BufferFlags::END_OF_STREAM);
        self.end_of_stream = true;
        info!("Audio input closed, end of stream queued");
        Ok(())
    }
}

impl Default for AacCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for AacCodec {
    fn name(&self) -> &str {
        "fdk-aac"
    }

    fn configure(&mut self, format: &MediaFormat) -> CodecResult<()> {
        self.state.require(CodecState::Uninitialized, "configure")?;
        if format.mime() != Some(MIME_AUDIO_AAC) {
            return Err(CodecError::Unsupported("MIME types other than audio/mp4a-latm"));
        }
        self.params = Some(AudioParams::from_format(format)?);
        self.state = CodecState::Configured;
        Ok(())
    }

    fn create_sample_queue(&mut self) -> CodecResult<SampleQueue> {
        self.state.require(CodecState::Configured, "create_sample_queue")?;
        let params = self.params.ok_or(CodecError::InvalidState("create_sample_queue"))?;
        let (queue, samples) = SampleQueue::new(params.sample_rate, params.channels);
        self.samples = Some(samples);
        Ok(queue)
    }

    #[instrument(name = "aac_start", skip(self))]
    fn start(&mut self) -> CodecResult<()> {
        self.state.require(CodecState::Configured, "start")?;
        let params = self.params.ok_or(CodecError::InvalidState("start"))?;

        let channels = if params.channels == 1 {
            fdk_aac::enc::ChannelMode::Mono
        } else {
            fdk_aac::enc::ChannelMode::Stereo
        };
        let encoder = fdk_aac::enc::Encoder::new(fdk_aac::enc::EncoderParams {
            bit_rate: fdk_aac::enc::BitRate::Cbr(params.bitrate_bps),
            sample_rate: params.sample_rate,
            transport: fdk_aac::enc::Transport::Raw,
            channels,
        })
        .map_err(|e| CodecError::Failed(format!("fdk-aac init failed: {:?}", e)))?;

        let info = encoder
            .info()
            .map_err(|e| CodecError::Failed(format!("fdk-aac info failed: {:?}", e)))?;
        self.scratch = vec![0u8; info.maxOutBufBytes as usize];

        let config = audio_specific_config(AacProfile::Lc, params.sample_rate, params.channels)
            .ok_or(CodecError::Unsupported("this sample rate"))?;
        let mut output_format =
            MediaFormat::audio(MIME_AUDIO_AAC, params.sample_rate, params.channels);
        output_format.set_bytes(keys::CSD_0, config);

        debug!(
            sample_rate = params.sample_rate,
            channels = params.channels,
            bitrate_bps = params.bitrate_bps,
            max_out_buf_bytes = info.maxOutBufBytes,
            "AAC encoder started"
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

        let received = match &self.samples {
            Some(samples) => samples.recv_timeout(timeout),
            None => return Err(CodecError::InvalidState("no sample queue")),
        };
        match received {
            Ok(chunk) => self.accept(chunk)?,
            Err(RecvTimeoutError::Timeout) => return Ok(PollResult::TryAgainLater),
            Err(RecvTimeoutError::Disconnected) => self.drain()?,
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
        self.samples = None;
        self.encoder = None;
        self.pending.clear();
        debug!("AAC encoder stopped");
        Ok(())
    }

    fn release(&mut self) {
        self.state = CodecState::Released;
        self.samples = None;
        self.encoder = None;
        self.pending.clear();
        self.pool.clear();
    }
}
