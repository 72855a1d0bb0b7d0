//! Error types for encoder sessions.

use thiserror::Error;

use livepush_ipc::{MediaKind, SinkError};

/// A configuration the encoder cannot accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncoderConfigError {
    /// Width or height is zero.
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Bitrate is zero.
    #[error("invalid bitrate {0} bps")]
    InvalidBitrate(u32),

    /// Frame rate is zero.
    #[error("invalid frame rate {0}")]
    InvalidFrameRate(u32),

    /// Sample rate or channel count not supported by AAC.
    #[error("unsupported audio format: {sample_rate} Hz, {channels} channel(s)")]
    InvalidAudioFormat { sample_rate: u32, channels: u16 },

    /// No encoder is registered for the MIME type.
    #[error("no encoder available for {mime}: {reason}")]
    NoEncoderAvailable { mime: String, reason: String },

    /// The encoder refused the configuration.
    #[error("encoder rejected configuration: {0}")]
    Rejected(String),
}

/// The output format lacks a usable codec-specific data range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderExtractionError {
    /// The key is absent from the output format.
    #[error("{kind} output format has no {key}")]
    MissingRange { kind: MediaKind, key: &'static str },

    /// The key is present but holds no bytes.
    #[error("{kind} output format has an empty {key}")]
    EmptyRange { kind: MediaKind, key: &'static str },
}

/// Errors raised by a codec implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The operation is not valid in the codec's current state.
    #[error("invalid codec state: {0}")]
    InvalidState(&'static str),

    /// The slot index is not held by the caller.
    #[error("output slot {0} is not outstanding")]
    InvalidIndex(i32),

    /// The codec does not offer this kind of input.
    #[error("codec does not support {0}")]
    Unsupported(&'static str),

    /// The codec has been released.
    #[error("codec released")]
    Released,

    /// Failure inside the codec.
    #[error("codec failure: {0}")]
    Failed(String),
}

/// Errors from an encoder session.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error(transparent)]
    Config(#[from] EncoderConfigError),

    #[error(transparent)]
    Header(#[from] HeaderExtractionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// The payload range does not fit inside the output buffer.
    #[error("payload range {offset}+{size} exceeds buffer of {capacity} bytes")]
    InvalidRange {
        offset: usize,
        size: usize,
        capacity: usize,
    },

    /// The session has already been stopped and released.
    #[error("encoder session already released")]
    AlreadyReleased,
}
