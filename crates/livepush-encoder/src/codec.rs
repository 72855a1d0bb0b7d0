//! The contract between an encoder session and a codec implementation.
//!
//! A codec hands out encoded output through numbered slots. Each slot
//! returned by [`Codec::dequeue_output`] stays owned by the caller until it
//! is given back with [`Codec::release_output`].

use std::fmt;
use std::ops::BitOr;
use std::time::Duration;

use livepush_capture::{InputSurface, SampleQueue};

use crate::error::CodecError;
use crate::format::MediaFormat;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Raw dequeue result: no output within the timeout.
pub const INFO_TRY_AGAIN_LATER: i32 = -1;

/// Raw dequeue result: the output format changed.
pub const INFO_OUTPUT_FORMAT_CHANGED: i32 = -2;

/// Raw dequeue result: output buffers were reallocated.
pub const INFO_OUTPUT_BUFFERS_CHANGED: i32 = -3;

/// Output buffer flags.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags(u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const KEY_FRAME: BufferFlags = BufferFlags(1);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(2);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(4);
    pub const PARTIAL_FRAME: BufferFlags = BufferFlags(8);

    pub const fn from_bits(bits: u32) -> Self {
        BufferFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BufferFlags {
    type Output = BufferFlags;

    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (BufferFlags::KEY_FRAME, "KEY_FRAME"),
            (BufferFlags::CODEC_CONFIG, "CODEC_CONFIG"),
            (BufferFlags::END_OF_STREAM, "END_OF_STREAM"),
            (BufferFlags::PARTIAL_FRAME, "PARTIAL_FRAME"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();

        if set.is_empty() {
            write!(f, "BufferFlags({:#x})", self.0)
        } else {
            write!(f, "BufferFlags({})", set.join(" | "))
        }
    }
}

/// Metadata describing one output slot's payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    /// Payload start within the slot's buffer.
    pub offset: usize,

    /// Payload length in bytes.
    pub size: usize,

    /// Presentation timestamp in microseconds.
    pub presentation_time_us: i64,

    pub flags: BufferFlags,
}

/// An output slot held by the caller until released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSlot {
    pub index: i32,
    pub info: BufferInfo,
}

/// Outcome of one bounded output poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// Nothing became available within the timeout.
    TryAgainLater,

    /// The output format changed; its codec-specific data can be read.
    FormatChanged,

    /// An output slot is ready.
    Slot(OutputSlot),
}

impl PollResult {
    /// Decode a raw dequeue return value.
    ///
    /// Non-negative values are slot indices. Unknown negative values are
    /// passed through as slots so the classifier can reject them.
    pub fn from_raw(index: i32, info: BufferInfo) -> Self {
        match index {
            INFO_TRY_AGAIN_LATER | INFO_OUTPUT_BUFFERS_CHANGED => PollResult::TryAgainLater,
            INFO_OUTPUT_FORMAT_CHANGED => PollResult::FormatChanged,
            index => PollResult::Slot(OutputSlot { index, info }),
        }
    }
}

/// The input handle an encoder exposes to its capture source.
#[derive(Debug, Clone)]
pub enum EncoderInput {
    Surface(InputSurface),
    Samples(SampleQueue),
}

/// An encoder instance.
pub trait Codec: Send {
    /// Codec name for diagnostics.
    fn name(&self) -> &str;

    /// Apply an input format. Must precede [`Codec::start`].
    fn configure(&mut self, format: &MediaFormat) -> CodecResult<()>;

    /// Create the surface video frames are rendered into.
    fn create_input_surface(&mut self) -> CodecResult<InputSurface> {
        Err(CodecError::Unsupported("input surfaces"))
    }

    /// Create the queue audio samples are written into.
    fn create_sample_queue(&mut self) -> CodecResult<SampleQueue> {
        Err(CodecError::Unsupported("sample queues"))
    }

    fn start(&mut self) -> CodecResult<()>;

    /// Wait at most `timeout` for output.
    fn dequeue_output(&mut self, timeout: Duration) -> CodecResult<PollResult>;

    /// The buffer behind an outstanding slot.
    fn output_buffer(&self, index: i32) -> Option<&[u8]>;

    /// The current output format.
    fn output_format(&self) -> MediaFormat;

    /// Give a slot back to the codec.
    fn release_output(&mut self, index: i32, render: bool) -> CodecResult<()>;

    fn stop(&mut self) -> CodecResult<()>;

    /// Free all codec resources. Safe to call after a failed `stop`.
    fn release(&mut self);
}

/// Creates codecs by MIME type.
pub trait EncoderProvider: Send + Sync {
    fn create_encoder(&self, mime: &str) -> CodecResult<Box<dyn Codec>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_bit_tests() {
        let flags = BufferFlags::KEY_FRAME | BufferFlags::CODEC_CONFIG;
        assert!(flags.contains(BufferFlags::CODEC_CONFIG));
        assert!(flags.contains(BufferFlags::KEY_FRAME));
        assert!(!flags.contains(BufferFlags::END_OF_STREAM));
        assert!(BufferFlags::NONE.contains(BufferFlags::NONE));
        assert_eq!(
            format!("{:?}", flags),
            "BufferFlags(KEY_FRAME | CODEC_CONFIG)"
        );
    }

    #[test]
    fn test_from_raw_sentinels() {
        let info = BufferInfo::default();
        assert_eq!(
            PollResult::from_raw(INFO_TRY_AGAIN_LATER, info),
            PollResult::TryAgainLater
        );
        assert_eq!(
            PollResult::from_raw(INFO_OUTPUT_BUFFERS_CHANGED, info),
            PollResult::TryAgainLater
        );
        assert_eq!(
            PollResult::from_raw(INFO_OUTPUT_FORMAT_CHANGED, info),
            PollResult::FormatChanged
        );
        assert_eq!(
            PollResult::from_raw(7, info),
            PollResult::Slot(OutputSlot { index: 7, info })
        );
        assert!(matches!(
            PollResult::from_raw(-9, info),
            PollResult::Slot(OutputSlot { index: -9, .. })
        ));
    }
}
