//! String-keyed media format descriptions.
//!
//! Used both to configure an encoder and to report its output format,
//! which is where the codec-specific data ranges (`csd-0`, `csd-1`) live.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

/// MIME type of H.264 video.
pub const MIME_VIDEO_AVC: &str = "video/avc";

/// MIME type of AAC audio.
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";

/// Format keys.
pub mod keys {
    pub const MIME: &str = "mime";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const BIT_RATE: &str = "bitrate";
    pub const BITRATE_MODE: &str = "bitrate-mode";
    pub const FRAME_RATE: &str = "frame-rate";
    pub const I_FRAME_INTERVAL: &str = "i-frame-interval";
    pub const COLOR_FORMAT: &str = "color-format";
    pub const SAMPLE_RATE: &str = "sample-rate";
    pub const CHANNEL_COUNT: &str = "channel-count";
    pub const AAC_PROFILE: &str = "aac-profile";
    pub const MAX_INPUT_SIZE: &str = "max-input-size";

    /// First codec-specific data range: the SPS for H.264, the
    /// AudioSpecificConfig for AAC.
    pub const CSD_0: &str = "csd-0";

    /// Second codec-specific data range: the PPS for H.264.
    pub const CSD_1: &str = "csd-1";
}

/// A single format value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatValue {
    Integer(i64),
    String(String),
    Bytes(Bytes),
}

/// An ordered map of format keys to values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaFormat {
    entries: BTreeMap<String, FormatValue>,
}

impl MediaFormat {
    /// An empty format.
    pub fn new() -> Self {
        Self::default()
    }

    /// A video format with MIME type and dimensions set.
    pub fn video(mime: &str, width: u32, height: u32) -> Self {
        let mut format = Self::new();
        format.set_string(keys::MIME, mime);
        format.set_integer(keys::WIDTH, i64::from(width));
        format.set_integer(keys::HEIGHT, i64::from(height));
        format
    }

    /// An audio format with MIME type, sample rate and channel count set.
    pub fn audio(mime: &str, sample_rate: u32, channels: u16) -> Self {
        let mut format = Self::new();
        format.set_string(keys::MIME, mime);
        format.set_integer(keys::SAMPLE_RATE, i64::from(sample_rate));
        format.set_integer(keys::CHANNEL_COUNT, i64::from(channels));
        format
    }

    pub fn set_integer(&mut self, key: &str, value: i64) {
        self.entries.insert(key.to_string(), FormatValue::Integer(value));
    }

    pub fn set_string(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.to_string(), FormatValue::String(value.to_string()));
    }

    pub fn set_bytes(&mut self, key: &str, value: impl Into<Bytes>) {
        self.entries
            .insert(key.to_string(), FormatValue::Bytes(value.into()));
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(FormatValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(FormatValue::String(v)) => Some(v),
            _ => None,
        }
    }

    pub fn bytes(&self, key: &str) -> Option<&Bytes> {
        match self.entries.get(key) {
            Some(FormatValue::Bytes(v)) => Some(v),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// The MIME type, if set.
    pub fn mime(&self) -> Option<&str> {
        self.string(keys::MIME)
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                FormatValue::Integer(v) => write!(f, "{}={}", key, v)?,
                FormatValue::String(v) => write!(f, "{}={}", key, v)?,
                FormatValue::Bytes(v) => write!(f, "{}=<{} bytes>", key, v.len())?,
            }
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_lookup() {
        let mut format = MediaFormat::video(MIME_VIDEO_AVC, 1920, 1000);
        format.set_bytes(keys::CSD_0, vec![0x67, 0x42]);

        assert_eq!(format.mime(), Some(MIME_VIDEO_AVC));
        assert_eq!(format.integer(keys::WIDTH), Some(1920));
        assert_eq!(format.bytes(keys::CSD_0).map(|b| b.len()), Some(2));

        // Wrong type reads as absent.
        assert_eq!(format.integer(keys::MIME), None);
        assert!(format.bytes(keys::CSD_1).is_none());
    }

    #[test]
    fn test_display_hides_byte_contents() {
        let mut format = MediaFormat::new();
        format.set_bytes(keys::CSD_0, vec![1, 2, 3]);
        format.set_integer(keys::SAMPLE_RATE, 44_100);
        assert_eq!(format.to_string(), "{csd-0=<3 bytes>, sample-rate=44100}");
    }
}
