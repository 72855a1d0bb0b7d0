//! Encoder sessions for the livepush pipeline.
//!
//! An [`EncoderSession`] owns one codec (H.264 video or AAC audio) and
//! drives it one bounded poll at a time. Each poll result is classified
//! ([`classify`]) into one of: nothing to do, a format change whose
//! header is extracted and handed to the sink ([`extract_header`]), or an
//! output slot whose payload is copied out and pushed ([`PushFrame`]).
//! Every slot is released back to the codec exactly once.
//!
//! Codecs are reached through the [`Codec`] trait. Software
//! implementations on x264 and fdk-aac are available with the `software`
//! feature.

#[cfg(feature = "software")]
mod aac_codec;
mod classifier;
mod codec;
mod config;
mod error;
mod format;
mod header;
pub mod nal;
mod push;
mod session;
#[cfg(feature = "software")]
pub mod software;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
#[cfg(feature = "software")]
mod x264_codec;

pub use classifier::{classify, Disposition, SkipReason};
pub use codec::{
    BufferFlags, BufferInfo, Codec, CodecResult, EncoderInput, EncoderProvider, OutputSlot,
    PollResult, INFO_OUTPUT_BUFFERS_CHANGED, INFO_OUTPUT_FORMAT_CHANGED, INFO_TRY_AGAIN_LATER,
};
pub use config::{
    AacProfile, AudioEncoderConfig, BitrateMode, ColorFormat, EncoderConfig, VideoEncoderConfig,
};
pub use error::{CodecError, EncoderConfigError, EncoderError, HeaderExtractionError};
pub use format::{keys, FormatValue, MediaFormat, MIME_AUDIO_AAC, MIME_VIDEO_AVC};
pub use header::{audio_specific_config, extract_header, HeaderBlob};
pub use push::{to_sink_timestamp, PushFrame, SINK_TIMESTAMP_SCALE};
pub use session::{EncoderSession, StepOutcome};

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;
