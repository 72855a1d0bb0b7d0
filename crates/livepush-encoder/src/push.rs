//! Payload hand-off to the sink.

use bytes::Bytes;
use tracing::trace;

use livepush_ipc::{MediaKind, SinkResult, StreamSink};

use crate::error::EncoderError;

/// Multiplier from encoder microseconds to sink nanoseconds.
pub const SINK_TIMESTAMP_SCALE: i64 = 1_000;

/// Convert an encoder timestamp (µs) to the sink's unit (ns).
pub fn to_sink_timestamp(timestamp_us: i64) -> i64 {
    timestamp_us.saturating_mul(SINK_TIMESTAMP_SCALE)
}

/// An owned payload copied out of an output slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFrame {
    /// Timestamp in sink units.
    pub timestamp: i64,

    pub payload: Bytes,
}

impl PushFrame {
    /// Copy `size` bytes starting at `offset` out of `buffer`.
    ///
    /// The copy is owned so the slot can be released right after.
    pub fn copy_from(
        buffer: &[u8],
        offset: usize,
        size: usize,
        timestamp_us: i64,
    ) -> Result<Self, EncoderError> {
        let range = offset
            .checked_add(size)
            .filter(|end| *end <= buffer.len())
            .map(|end| offset..end)
            .ok_or(EncoderError::InvalidRange {
                offset,
                size,
                capacity: buffer.len(),
            })?;

        Ok(Self {
            timestamp: to_sink_timestamp(timestamp_us),
            payload: Bytes::copy_from_slice(&buffer[range]),
        })
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Hand the payload to the sink's push call for `kind`.
    pub fn push(self, kind: MediaKind, sink: &dyn StreamSink) -> SinkResult<()> {
        trace!(%kind, timestamp = self.timestamp, bytes = self.payload.len(), "Pushing payload");
        match kind {
            MediaKind::Video => sink.push_video_data(self.timestamp, self.payload),
            MediaKind::Audio => sink.push_audio_data(self.timestamp, self.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_scale() {
        assert_eq!(to_sink_timestamp(33_333), 33_333_000);
        assert_eq!(to_sink_timestamp(0), 0);
        assert_eq!(to_sink_timestamp(i64::MAX), i64::MAX);
    }

    #[test]
    fn test_copy_respects_offset_and_size() {
        let buffer: Vec<u8> = (0..16).collect();
        let frame = PushFrame::copy_from(&buffer, 4, 3, 10).unwrap();

        assert_eq!(frame.payload.as_ref(), &[4, 5, 6]);
        assert_eq!(frame.timestamp, 10_000);
        assert_eq!(frame.len(), 3);
    }

    #[test]
    fn test_copy_rejects_out_of_range() {
        let buffer = [0u8; 8];
        assert!(matches!(
            PushFrame::copy_from(&buffer, 6, 4, 0),
            Err(EncoderError::InvalidRange { offset: 6, size: 4, capacity: 8 })
        ));
        assert!(PushFrame::copy_from(&buffer, usize::MAX, 2, 0).is_err());
    }
}
