//! Classification of poll results.
//!
//! Pure decision logic: given what a poll returned, decide what the
//! session does with it. Never touches the codec or the sink.

use crate::codec::{BufferFlags, PollResult};

/// Why a slot is released without being forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The slot carries codec configuration, delivered via the header path.
    CodecConfig,

    /// The slot carries no payload.
    Empty,

    /// The slot index is negative.
    InvalidIndex,

    /// The payload range does not fit the slot's buffer.
    OutOfRange,
}

/// What to do with a poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing to do; poll again.
    Idle,

    /// Read the output format and deliver its header.
    ExtractHeader,

    /// Copy the payload to the sink, then release the slot.
    Forward {
        index: i32,
        offset: usize,
        size: usize,
        timestamp_us: i64,
        end_of_stream: bool,
    },

    /// Release the slot without forwarding.
    Skip {
        index: i32,
        reason: SkipReason,
        end_of_stream: bool,
    },
}

impl Disposition {
    /// The slot this disposition must release, if any.
    ///
    /// Negative indices name no slot and are never released.
    pub fn slot_index(&self) -> Option<i32> {
        match *self {
            Disposition::Forward { index, .. } | Disposition::Skip { index, .. } => {
                Some(index).filter(|i| *i >= 0)
            }
            _ => None,
        }
    }

    /// True when the slot carried the end-of-stream flag.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(
            self,
            Disposition::Forward { end_of_stream: true, .. }
                | Disposition::Skip { end_of_stream: true, .. }
        )
    }
}

/// Classify one poll result.
pub fn classify(poll: &PollResult) -> Disposition {
    let slot = match poll {
        PollResult::TryAgainLater => return Disposition::Idle,
        PollResult::FormatChanged => return Disposition::ExtractHeader,
        PollResult::Slot(slot) => slot,
    };

    let info = slot.info;
    let end_of_stream = info.flags.contains(BufferFlags::END_OF_STREAM);
    let skip = |reason| Disposition::Skip {
        index: slot.index,
        reason,
        end_of_stream,
    };

    if slot.index < 0 {
        skip(SkipReason::InvalidIndex)
    } else if info.flags.contains(BufferFlags::CODEC_CONFIG) {
        skip(SkipReason::CodecConfig)
    } else if info.size == 0 {
        skip(SkipReason::Empty)
    } else {
        Disposition::Forward {
            index: slot.index,
            offset: info.offset,
            size: info.size,
            timestamp_us: info.presentation_time_us,
            end_of_stream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BufferInfo, OutputSlot};

    fn slot(index: i32, size: usize, flags: BufferFlags, pts: i64) -> PollResult {
        PollResult::Slot(OutputSlot {
            index,
            info: BufferInfo {
                offset: 0,
                size,
                presentation_time_us: pts,
                flags,
            },
        })
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(classify(&PollResult::TryAgainLater), Disposition::Idle);
        assert_eq!(classify(&PollResult::FormatChanged), Disposition::ExtractHeader);
        assert_eq!(Disposition::Idle.slot_index(), None);
    }

    #[test]
    fn test_plain_frame_is_forwarded() {
        assert_eq!(
            classify(&slot(3, 128, BufferFlags::NONE, 33_333)),
            Disposition::Forward {
                index: 3,
                offset: 0,
                size: 128,
                timestamp_us: 33_333,
                end_of_stream: false,
            }
        );
    }

    #[test]
    fn test_key_frame_is_forwarded() {
        let d = classify(&slot(0, 4096, BufferFlags::KEY_FRAME, 0));
        assert!(matches!(d, Disposition::Forward { size: 4096, .. }));
    }

    #[test]
    fn test_codec_config_is_skipped_even_with_other_bits() {
        let d = classify(&slot(2, 40, BufferFlags::CODEC_CONFIG, 0));
        assert_eq!(
            d,
            Disposition::Skip {
                index: 2,
                reason: SkipReason::CodecConfig,
                end_of_stream: false,
            }
        );

        let combined = BufferFlags::CODEC_CONFIG | BufferFlags::KEY_FRAME;
        let d = classify(&slot(2, 40, combined, 0));
        assert!(matches!(d, Disposition::Skip { reason: SkipReason::CodecConfig, .. }));
        assert_eq!(d.slot_index(), Some(2));
    }

    #[test]
    fn test_empty_and_negative_slots_are_skipped() {
        assert!(matches!(
            classify(&slot(1, 0, BufferFlags::NONE, 0)),
            Disposition::Skip { reason: SkipReason::Empty, .. }
        ));
        let negative = classify(&slot(-7, 64, BufferFlags::NONE, 0));
        assert!(matches!(
            negative,
            Disposition::Skip { index: -7, reason: SkipReason::InvalidIndex, .. }
        ));
        assert_eq!(negative.slot_index(), None);
    }

    #[test]
    fn test_end_of_stream_is_reported() {
        let d = classify(&slot(5, 0, BufferFlags::END_OF_STREAM, 0));
        assert!(d.is_end_of_stream());
        assert!(matches!(d, Disposition::Skip { reason: SkipReason::Empty, .. }));

        let d = classify(&slot(5, 10, BufferFlags::END_OF_STREAM, 0));
        assert!(d.is_end_of_stream());
        assert!(matches!(d, Disposition::Forward { .. }));
    }
}
