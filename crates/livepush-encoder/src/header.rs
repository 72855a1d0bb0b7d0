//! Decoder-configuration headers read from an encoder's output format.

use bytes::Bytes;
use tracing::debug;

use livepush_ipc::{MediaKind, SinkResult, StreamSink};

use crate::config::{aac_sample_rate_index, AacProfile};
use crate::error::HeaderExtractionError;
use crate::format::{keys, MediaFormat};

/// A decoder-configuration blob ready for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderBlob {
    /// H.264 sequence and picture parameter sets.
    Video { sps: Bytes, pps: Bytes },

    /// AAC AudioSpecificConfig.
    Audio { config: Bytes },
}

impl HeaderBlob {
    pub fn kind(&self) -> MediaKind {
        match self {
            HeaderBlob::Video { .. } => MediaKind::Video,
            HeaderBlob::Audio { .. } => MediaKind::Audio,
        }
    }

    /// Total header size in bytes.
    pub fn len(&self) -> usize {
        match self {
            HeaderBlob::Video { sps, pps } => sps.len() + pps.len(),
            HeaderBlob::Audio { config } => config.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand the header to the sink's matching init call.
    pub fn deliver(&self, sink: &dyn StreamSink) -> SinkResult<()> {
        match self {
            HeaderBlob::Video { sps, pps } => sink.init_video_header(sps, pps),
            HeaderBlob::Audio { config } => sink.init_audio_header(config),
        }
    }
}

fn required_range(
    kind: MediaKind,
    format: &MediaFormat,
    key: &'static str,
) -> Result<Bytes, HeaderExtractionError> {
    match format.bytes(key) {
        None => Err(HeaderExtractionError::MissingRange { kind, key }),
        Some(bytes) if bytes.is_empty() => Err(HeaderExtractionError::EmptyRange { kind, key }),
        Some(bytes) => Ok(bytes.clone()),
    }
}

/// Read the header for `kind` from an output format.
///
/// Video needs both `csd-0` (SPS) and `csd-1` (PPS); audio needs `csd-0`.
/// The bytes are copied out in their stored order.
pub fn extract_header(
    kind: MediaKind,
    format: &MediaFormat,
) -> Result<HeaderBlob, HeaderExtractionError> {
    let blob = match kind {
        MediaKind::Video => HeaderBlob::Video {
            sps: required_range(kind, format, keys::CSD_0)?,
            pps: required_range(kind, format, keys::CSD_1)?,
        },
        MediaKind::Audio => HeaderBlob::Audio {
            config: required_range(kind, format, keys::CSD_0)?,
        },
    };

    debug!(%kind, bytes = blob.len(), "Extracted header from output format");
    Ok(blob)
}

/// Build a two-byte AudioSpecificConfig.
///
/// Returns `None` if the sample rate has no table index.
pub fn audio_specific_config(profile: AacProfile, sample_rate: u32, channels: u16) -> Option<Bytes> {
    let index = aac_sample_rate_index(sample_rate)?;
    let object_type = profile.object_type();
    let channels = (channels & 0x0F) as u8;

    // 5 bits object type, 4 bits frequency index, 4 bits channel config, 3 bits zero.
    let first = (object_type << 3) | (index >> 1);
    let second = ((index & 0x01) << 7) | (channels << 3);
    Some(Bytes::from(vec![first, second]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: [u8; 4] = [0x67, 0x42, 0x00, 0x1f];
    const PPS: [u8; 3] = [0x68, 0xce, 0x38];

    #[test]
    fn test_video_header_from_both_ranges() {
        let mut format = MediaFormat::new();
        format.set_bytes(keys::CSD_0, SPS.to_vec());
        format.set_bytes(keys::CSD_1, PPS.to_vec());

        let blob = extract_header(MediaKind::Video, &format).unwrap();
        assert_eq!(
            blob,
            HeaderBlob::Video {
                sps: Bytes::from_static(&SPS),
                pps: Bytes::from_static(&PPS),
            }
        );
        assert_eq!(blob.len(), 7);
    }

    #[test]
    fn test_video_header_needs_pps() {
        let mut format = MediaFormat::new();
        format.set_bytes(keys::CSD_0, SPS.to_vec());

        assert_eq!(
            extract_header(MediaKind::Video, &format),
            Err(HeaderExtractionError::MissingRange {
                kind: MediaKind::Video,
                key: keys::CSD_1,
            })
        );
    }

    #[test]
    fn test_audio_header_from_csd0() {
        let mut format = MediaFormat::new();
        format.set_bytes(keys::CSD_0, vec![0x12, 0x08]);

        let blob = extract_header(MediaKind::Audio, &format).unwrap();
        assert_eq!(blob.kind(), MediaKind::Audio);
        assert_eq!(blob, HeaderBlob::Audio { config: Bytes::from_static(&[0x12, 0x08]) });
    }

    #[test]
    fn test_empty_range_is_an_error() {
        let mut format = MediaFormat::new();
        format.set_bytes(keys::CSD_0, Vec::new());

        assert_eq!(
            extract_header(MediaKind::Audio, &format),
            Err(HeaderExtractionError::EmptyRange {
                kind: MediaKind::Audio,
                key: keys::CSD_0,
            })
        );
    }

    #[test]
    fn test_audio_specific_config() {
        // AAC-LC, 44.1 kHz, mono.
        let asc = audio_specific_config(AacProfile::Lc, 44_100, 1).unwrap();
        assert_eq!(asc.as_ref(), &[0x12, 0x08]);

        // AAC-LC, 48 kHz, stereo.
        let asc = audio_specific_config(AacProfile::Lc, 48_000, 2).unwrap();
        assert_eq!(asc.as_ref(), &[0x11, 0x90]);

        assert!(audio_specific_config(AacProfile::Lc, 12_345, 1).is_none());
    }
}
