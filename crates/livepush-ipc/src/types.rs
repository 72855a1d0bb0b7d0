//! Common types used across the pipeline crates.

use serde::{Deserialize, Serialize};

use crate::sink::VideoInfo;
use crate::state::MediaKind;

/// Default bounded wait for one video poll, in microseconds.
pub const DEFAULT_VIDEO_POLL_TIMEOUT_US: u64 = 10_000;

/// Default bounded wait for one audio poll, in microseconds.
pub const DEFAULT_AUDIO_POLL_TIMEOUT_US: u64 = 5_000;

/// Configuration for a streaming run.
///
/// This is the single source of truth for every encoder parameter; the
/// encoder configs are derived from it rather than carrying their own
/// constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Sink URL (e.g., "rtmp://192.168.1.33/live").
    pub url: String,

    /// Stream name published at the sink.
    pub stream_name: String,

    /// Video session settings.
    pub video: VideoSettings,

    /// Audio session settings.
    pub audio: AudioSettings,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            stream_name: String::new(),
            video: VideoSettings::default(),
            audio: AudioSettings::default(),
        }
    }
}

/// Screen capture and H.264 encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    /// Encoded width in pixels.
    pub width: u32,

    /// Encoded height in pixels (the reported display height).
    pub height: u32,

    /// Rows hidden from the reported display size (e.g. a navigation bar).
    ///
    /// Added back to `height` when announcing video info to the sink.
    pub display_inset: u32,

    /// Display density handed to the capture source.
    pub dpi: u32,

    /// Target bit rate in bits per second (CBR).
    pub bitrate_bps: u32,

    /// Frames per second.
    pub frame_rate: u32,

    /// Key-frame interval in seconds.
    pub i_frame_interval_secs: u32,

    /// Bounded wait for one poll, in microseconds.
    pub poll_timeout_us: u64,
}

impl VideoSettings {
    /// Height of the encoded picture and capture surface, including the inset.
    pub fn surface_height(&self) -> u32 {
        self.height.saturating_add(self.display_inset)
    }

    /// Geometry announced to the sink before streaming starts.
    pub fn sink_video_info(&self) -> VideoInfo {
        VideoInfo {
            width: self.width,
            height: self.surface_height(),
            fps: self.frame_rate,
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            display_inset: 0,
            dpi: 1,
            bitrate_bps: 6_000_000,
            frame_rate: 60,
            i_frame_interval_secs: 2,
            poll_timeout_us: DEFAULT_VIDEO_POLL_TIMEOUT_US,
        }
    }
}

/// Microphone and AAC encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Sample rate in Hz.
    pub sample_rate: u32,

    /// Number of channels.
    pub channels: u16,

    /// Target bit rate in bits per second.
    pub bitrate_bps: u32,

    /// Input device identifier (None for the default device).
    pub device: Option<String>,

    /// Bounded wait for one poll, in microseconds.
    pub poll_timeout_us: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            bitrate_bps: 128_000,
            device: None,
            poll_timeout_us: DEFAULT_AUDIO_POLL_TIMEOUT_US,
        }
    }
}

/// Snapshot of one session's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Which session these counters belong to.
    pub kind: MediaKind,

    /// Poll calls issued.
    pub polls: u64,

    /// Polls that returned "try again".
    pub idle_polls: u64,

    /// Header blobs handed to the sink.
    pub headers_sent: u64,

    /// Payload frames handed to the sink.
    pub frames_forwarded: u64,

    /// Payload bytes handed to the sink.
    pub bytes_forwarded: u64,

    /// Codec-config slots released without forwarding.
    pub config_skips: u64,

    /// Empty or malformed slots released without forwarding.
    pub empty_skips: u64,

    /// Format changes whose header could not be extracted.
    pub header_failures: u64,

    /// Sink calls that failed.
    pub sink_failures: u64,
}

/// An audio input device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Unique identifier for this device.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Whether this is the default device.
    pub is_default: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{
            "url": "rtmp://192.168.1.33/live",
            "stream_name": "push",
            "video": { "height": 1000, "display_inset": 80 }
        }"#;
        let config: StreamConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.url, "rtmp://192.168.1.33/live");
        assert_eq!(config.video.width, 1920);
        assert_eq!(config.video.height, 1000);
        assert_eq!(config.video.bitrate_bps, 6_000_000);
        assert_eq!(config.video.frame_rate, 60);
        assert_eq!(config.audio, AudioSettings::default());
    }

    #[test]
    fn test_sink_video_info_adds_inset() {
        let settings = VideoSettings {
            width: 1920,
            height: 1000,
            display_inset: 80,
            ..Default::default()
        };
        let info = settings.sink_video_info();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.fps, 60);
    }

    #[test]
    fn test_default_poll_timeouts() {
        let config = StreamConfig::default();
        assert_eq!(config.video.poll_timeout_us, 10_000);
        assert_eq!(config.audio.poll_timeout_us, 5_000);
    }
}
