//! Software codecs built on x264 and fdk-aac.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use tracing::debug;

use crate::codec::{BufferFlags, BufferInfo, Codec, CodecResult, EncoderProvider, OutputSlot};
use crate::error::CodecError;
use crate::format::{MIME_AUDIO_AAC, MIME_VIDEO_AVC};

pub use crate::aac_codec::AacCodec;
pub use crate::x264_codec::X264Codec;

/// Output slots per codec.
pub(crate) const OUTPUT_SLOTS: usize = 4;

/// Lifecycle of a software codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CodecState {
    Uninitialized,
    Configured,
    Running,
    Stopped,
    Released,
}

impl CodecState {
    pub(crate) fn require(self, wanted: CodecState, operation: &'static str) -> CodecResult<()> {
        match self {
            CodecState::Released => Err(CodecError::Released),
            state if state == wanted => Ok(()),
            _ => Err(CodecError::InvalidState(operation)),
        }
    }
}

/// Encoded packets waiting to be dequeued, plus the slots handed out.
#[derive(Debug)]
pub(crate) struct OutputPool {
    capacity: usize,
    ready: VecDeque<(Bytes, i64, BufferFlags)>,
    outstanding: HashMap<i32, Bytes>,
}

impl OutputPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ready: VecDeque::new(),
            outstanding: HashMap::new(),
        }
    }

    pub(crate) fn enqueue(&mut self, data: Bytes, timestamp_us: i64, flags: BufferFlags) {
        self.ready.push_back((data, timestamp_us, flags));
    }

    /// Hand out the next ready packet in the lowest free slot.
    pub(crate) fn dequeue(&mut self) -> Option<OutputSlot> {
        if self.outstanding.len() >= self.capacity {
            return None;
        }
        let index = (0..self.capacity as i32).find(|i| !self.outstanding.contains_key(i))?;
        let (data, timestamp_us, flags) = self.ready.pop_front()?;

        let info = BufferInfo {
            offset: 0,
            size: data.len(),
            presentation_time_us: timestamp_us,
            flags,
        };
        self.outstanding.insert(index, data);
        Some(OutputSlot { index, info })
    }

    pub(crate) fn buffer(&self, index: i32) -> Option<&[u8]> {
        self.outstanding.get(&index).map(|data| data.as_ref())
    }

    pub(crate) fn release(&mut self, index: i32) -> CodecResult<()> {
        self.outstanding
            .remove(&index)
            .map(|_| ())
            .ok_or(CodecError::InvalidIndex(index))
    }

    pub(crate) fn clear(&mut self) {
        self.ready.clear();
        self.outstanding.clear();
    }
}

/// Resolves H.264 to [`X264Codec`] and AAC to [`AacCodec`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareProvider;

impl EncoderProvider for SoftwareProvider {
    fn create_encoder(&self, mime: &str) -> CodecResult<Box<dyn Codec>> {
        debug!(mime, "Creating software encoder");
        match mime {
            MIME_VIDEO_AVC => Ok(Box::new(X264Codec::new())),
            MIME_AUDIO_AAC => Ok(Box::new(AacCodec::new())),
            _ => Err(CodecError::Unsupported("this MIME type")),
        }
    }
}
