//! The sink interface encoded units are pushed into.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Errors a sink can report back to the pipeline.
///
/// None of these are fatal to a running session: a failed push is counted
/// and the poll loop continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The sink cannot accept data (connection gone, worker stopped).
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// The sink has not been opened.
    #[error("Sink not open")]
    NotOpen,

    /// The sink's queue is full and the unit was dropped.
    #[error("Sink congested, unit dropped")]
    Congested,

    /// The sink refused the data.
    #[error("Sink rejected data: {0}")]
    Rejected(String),
}

/// Handle returned by [`StreamSink::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SinkSession(pub u64);

/// Video geometry announced to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Destination for codec headers and payload frames.
///
/// Timestamps are in the sink's unit (nanoseconds); see
/// `livepush_encoder::SINK_TIMESTAMP_SCALE` for the conversion from the
/// encoder's microseconds. Calls arrive on the encoder-loop threads, so a
/// slow implementation adds latency to the poll loop; any queueing belongs
/// inside the sink.
pub trait StreamSink: Send + Sync {
    /// Open a streaming session.
    fn open(&self, url: &str, name: &str) -> SinkResult<SinkSession>;

    /// Close a streaming session.
    fn close(&self, session: SinkSession) -> SinkResult<()>;

    /// Announce the video geometry before any header is sent.
    fn init_video_info(&self, _info: VideoInfo) -> SinkResult<()> {
        Ok(())
    }

    /// Initialize the decoder header state with SPS and PPS.
    fn init_video_header(&self, sps: &[u8], pps: &[u8]) -> SinkResult<()>;

    /// Initialize the decoder header state with an AudioSpecificConfig.
    fn init_audio_header(&self, config: &[u8]) -> SinkResult<()>;

    /// Push one encoded video unit.
    fn push_video_data(&self, timestamp: i64, data: Bytes) -> SinkResult<()>;

    /// Push one encoded audio unit.
    fn push_audio_data(&self, timestamp: i64, data: Bytes) -> SinkResult<()>;
}
