//! Encoder configurations derived from the stream settings.

use livepush_ipc::{AudioSettings, MediaKind, VideoSettings};

use crate::error::EncoderConfigError;
use crate::format::{keys, MediaFormat, MIME_AUDIO_AAC, MIME_VIDEO_AVC};

/// Sampling frequencies addressable by an AAC AudioSpecificConfig index.
const AAC_SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Index of `sample_rate` in the AAC sampling frequency table.
pub(crate) fn aac_sample_rate_index(sample_rate: u32) -> Option<u8> {
    AAC_SAMPLE_RATES
        .iter()
        .position(|&rate| rate == sample_rate)
        .map(|i| i as u8)
}

/// Rate control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitrateMode {
    Cq,
    Vbr,
    Cbr,
}

impl BitrateMode {
    /// Numeric value stored under [`keys::BITRATE_MODE`].
    pub fn code(self) -> i64 {
        match self {
            BitrateMode::Cq => 0,
            BitrateMode::Vbr => 1,
            BitrateMode::Cbr => 2,
        }
    }
}

/// How frames reach the video encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    /// Frames are rendered into an input surface.
    Surface,
    /// Raw NV12 buffers.
    Nv12,
}

impl ColorFormat {
    /// Numeric value stored under [`keys::COLOR_FORMAT`].
    pub fn code(self) -> i64 {
        match self {
            ColorFormat::Surface => 0x7F00_0789,
            ColorFormat::Nv12 => 21,
        }
    }
}

/// AAC object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacProfile {
    Lc,
    He,
}

impl AacProfile {
    /// Audio object type as written into an AudioSpecificConfig.
    pub fn object_type(self) -> u8 {
        match self {
            AacProfile::Lc => 2,
            AacProfile::He => 5,
        }
    }
}

/// H.264 encoder configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderConfig {
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub bitrate_mode: BitrateMode,
    pub frame_rate: u32,
    pub i_frame_interval_secs: u32,
    pub color_format: ColorFormat,
}

impl VideoEncoderConfig {
    pub fn validate(&self) -> Result<(), EncoderConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(EncoderConfigError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.bitrate_bps == 0 {
            return Err(EncoderConfigError::InvalidBitrate(self.bitrate_bps));
        }
        if self.frame_rate == 0 {
            return Err(EncoderConfigError::InvalidFrameRate(self.frame_rate));
        }
        Ok(())
    }

    /// Frames between forced key frames.
    pub fn keyframe_interval_frames(&self) -> u32 {
        self.frame_rate
            .saturating_mul(self.i_frame_interval_secs)
            .max(1)
    }

    pub fn to_format(&self) -> MediaFormat {
        let mut format = MediaFormat::video(MIME_VIDEO_AVC, self.width, self.height);
        format.set_integer(keys::BIT_RATE, i64::from(self.bitrate_bps));
        format.set_integer(keys::BITRATE_MODE, self.bitrate_mode.code());
        format.set_integer(keys::FRAME_RATE, i64::from(self.frame_rate));
        format.set_integer(keys::I_FRAME_INTERVAL, i64::from(self.i_frame_interval_secs));
        format.set_integer(keys::COLOR_FORMAT, self.color_format.code());
        format
    }
}

impl From<&VideoSettings> for VideoEncoderConfig {
    fn from(settings: &VideoSettings) -> Self {
        Self {
            width: settings.width,
            height: settings.surface_height(),
            bitrate_bps: settings.bitrate_bps,
            bitrate_mode: BitrateMode::Cbr,
            frame_rate: settings.frame_rate,
            i_frame_interval_secs: settings.i_frame_interval_secs,
            color_format: ColorFormat::Surface,
        }
    }
}

/// AAC encoder configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_bps: u32,
    pub profile: AacProfile,
}

impl AudioEncoderConfig {
    pub fn validate(&self) -> Result<(), EncoderConfigError> {
        if aac_sample_rate_index(self.sample_rate).is_none() || !(1..=2).contains(&self.channels) {
            return Err(EncoderConfigError::InvalidAudioFormat {
                sample_rate: self.sample_rate,
                channels: self.channels,
            });
        }
        if self.bitrate_bps == 0 {
            return Err(EncoderConfigError::InvalidBitrate(self.bitrate_bps));
        }
        Ok(())
    }

    pub fn to_format(&self) -> MediaFormat {
        let mut format = MediaFormat::audio(MIME_AUDIO_AAC, self.sample_rate, self.channels);
        format.set_integer(keys::BIT_RATE, i64::from(self.bitrate_bps));
        format.set_integer(keys::AAC_PROFILE, i64::from(self.profile.object_type()));
        format
    }
}

impl From<&AudioSettings> for AudioEncoderConfig {
    fn from(settings: &AudioSettings) -> Self {
        Self {
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            bitrate_bps: settings.bitrate_bps,
            profile: AacProfile::Lc,
        }
    }
}

/// Configuration of either session kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderConfig {
    Video(VideoEncoderConfig),
    Audio(AudioEncoderConfig),
}

impl EncoderConfig {
    pub fn kind(&self) -> MediaKind {
        match self {
            EncoderConfig::Video(_) => MediaKind::Video,
            EncoderConfig::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            EncoderConfig::Video(_) => MIME_VIDEO_AVC,
            EncoderConfig::Audio(_) => MIME_AUDIO_AAC,
        }
    }

    pub fn validate(&self) -> Result<(), EncoderConfigError> {
        match self {
            EncoderConfig::Video(config) => config.validate(),
            EncoderConfig::Audio(config) => config.validate(),
        }
    }

    pub fn to_format(&self) -> MediaFormat {
        match self {
            EncoderConfig::Video(config) => config.to_format(),
            EncoderConfig::Audio(config) => config.to_format(),
        }
    }
}

impl From<VideoEncoderConfig> for EncoderConfig {
    fn from(config: VideoEncoderConfig) -> Self {
        EncoderConfig::Video(config)
    }
}

impl From<AudioEncoderConfig> for EncoderConfig {
    fn from(config: AudioEncoderConfig) -> Self {
        EncoderConfig::Audio(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_config_from_settings() {
        let settings = VideoSettings {
            height: 1000,
            display_inset: 80,
            ..Default::default()
        };
        let config = VideoEncoderConfig::from(&settings);

        assert_eq!((config.width, config.height), (1920, 1080));
        assert_eq!(config.bitrate_bps, 6_000_000);
        assert_eq!(config.bitrate_mode, BitrateMode::Cbr);
        assert_eq!(config.keyframe_interval_frames(), 120);
        assert!(config.validate().is_ok());

        let format = config.to_format();
        assert_eq!(format.mime(), Some(MIME_VIDEO_AVC));
        assert_eq!(format.integer(keys::HEIGHT), Some(1080));
        assert_eq!(format.integer(keys::BITRATE_MODE), Some(2));
        assert_eq!(format.integer(keys::COLOR_FORMAT), Some(0x7F00_0789));
    }

    #[test]
    fn test_encoder_height_matches_announced_height() {
        let settings = VideoSettings {
            width: 1920,
            height: 1000,
            display_inset: 80,
            ..Default::default()
        };
        let config = VideoEncoderConfig::from(&settings);
        let info = settings.sink_video_info();

        assert_eq!((config.width, config.height), (info.width, info.height));
        assert_eq!(config.height, 1080);
    }

    #[test]
    fn test_video_config_rejects_zero_values() {
        let base = VideoEncoderConfig::from(&VideoSettings::default());

        let zero_width = VideoEncoderConfig { width: 0, ..base.clone() };
        assert!(matches!(
            zero_width.validate(),
            Err(EncoderConfigError::InvalidDimensions { width: 0, .. })
        ));

        let zero_rate = VideoEncoderConfig { bitrate_bps: 0, ..base.clone() };
        assert_eq!(zero_rate.validate(), Err(EncoderConfigError::InvalidBitrate(0)));

        let zero_fps = VideoEncoderConfig { frame_rate: 0, ..base };
        assert_eq!(zero_fps.validate(), Err(EncoderConfigError::InvalidFrameRate(0)));
    }

    #[test]
    fn test_audio_config_validation() {
        let config = AudioEncoderConfig::from(&AudioSettings::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.to_format().integer(keys::AAC_PROFILE), Some(2));

        let odd_rate = AudioEncoderConfig { sample_rate: 44_000, ..config.clone() };
        assert!(matches!(
            odd_rate.validate(),
            Err(EncoderConfigError::InvalidAudioFormat { sample_rate: 44_000, .. })
        ));

        let surround = AudioEncoderConfig { channels: 6, ..config };
        assert!(surround.validate().is_err());
    }

    #[test]
    fn test_sample_rate_index() {
        assert_eq!(aac_sample_rate_index(48_000), Some(3));
        assert_eq!(aac_sample_rate_index(44_100), Some(4));
        assert_eq!(aac_sample_rate_index(1), None);
    }
}
