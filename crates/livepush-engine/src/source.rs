//! Capture sources bound to encoder inputs.

use tracing::debug;

use livepush_capture::{
    AudioCapture, CaptureError, CaptureResult, NullProjection, Projection, TestPatternDisplay,
    ToneMicrophone, VideoCapture,
};
use livepush_encoder::EncoderInput;
use livepush_ipc::{AudioSettings, MediaKind, VideoSettings};

use crate::error::EngineError;

/// The capture side of one session.
pub enum CaptureSource {
    /// A virtual display and the projection it depends on.
    Video {
        display: Box<dyn VideoCapture>,
        projection: Option<Box<dyn Projection>>,
        dpi: u32,
    },

    /// A microphone and the device to capture from.
    Audio {
        microphone: Box<dyn AudioCapture>,
        device: Option<String>,
    },
}

impl CaptureSource {
    pub fn video(
        display: Box<dyn VideoCapture>,
        projection: Option<Box<dyn Projection>>,
        dpi: u32,
    ) -> Self {
        Self::Video {
            display,
            projection,
            dpi,
        }
    }

    pub fn audio(microphone: Box<dyn AudioCapture>, device: Option<String>) -> Self {
        Self::Audio { microphone, device }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Video { .. } => MediaKind::Video,
            Self::Audio { .. } => MediaKind::Audio,
        }
    }

    /// Hand the encoder's input to the source so it starts producing.
    pub fn bind(&mut self, input: EncoderInput) -> Result<(), EngineError> {
        match (self, input) {
            (Self::Video { display, dpi, .. }, EncoderInput::Surface(surface)) => {
                display.bind(surface, *dpi)?;
            }
            (Self::Audio { microphone, device }, EncoderInput::Samples(queue)) => {
                microphone.select_device(device.as_deref())?;
                microphone.start(queue)?;
            }
            _ => return Err(EngineError::InputMismatch),
        }
        Ok(())
    }

    /// Drop the binding to the encoder input. Returns false if there was none.
    pub fn release_binding(&mut self) -> CaptureResult<bool> {
        match self {
            Self::Video { display, .. } if display.is_bound() => display.release().map(|_| true),
            Self::Audio { microphone, .. } if microphone.is_active() => {
                microphone.release().map(|_| true)
            }
            _ => Ok(false),
        }
    }

    /// Stop the projection, once. Returns false if there was none.
    pub fn release_projection(&mut self) -> CaptureResult<bool> {
        match self {
            Self::Video { projection, .. } => match projection.take() {
                Some(mut projection) => projection.stop().map(|_| true),
                None => Ok(false),
            },
            Self::Audio { .. } => Ok(false),
        }
    }
}

/// Creates fresh capture sources for every stream start.
pub trait CaptureFactory: Send {
    fn video_source(&mut self, settings: &VideoSettings) -> CaptureResult<CaptureSource>;

    fn audio_source(&mut self, settings: &AudioSettings) -> CaptureResult<CaptureSource>;
}

/// Test-pattern display and tone microphone.
#[derive(Debug, Default)]
pub struct SyntheticCaptures;

impl CaptureFactory for SyntheticCaptures {
    fn video_source(&mut self, settings: &VideoSettings) -> CaptureResult<CaptureSource> {
        debug!(fps = settings.frame_rate, "Creating test pattern display");
        Ok(CaptureSource::video(
            Box::new(TestPatternDisplay::new(settings.frame_rate)),
            Some(Box::new(NullProjection::new())),
            settings.dpi,
        ))
    }

    fn audio_source(&mut self, settings: &AudioSettings) -> CaptureResult<CaptureSource> {
        let microphone = ToneMicrophone::new();
        if let Some(id) = settings.device.as_deref() {
            if !microphone.devices()?.iter().any(|d| d.id == id) {
                return Err(CaptureError::DeviceNotFound(id.to_string()));
            }
        }
        Ok(CaptureSource::audio(
            Box::new(microphone),
            settings.device.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepush_capture::{InputSurface, SampleQueue};
    use livepush_encoder::testing::{Call, CallLog, RecordingDisplay, RecordingMicrophone, RecordingProjection};

    #[test]
    fn test_bind_rejects_mismatched_input() {
        let log = CallLog::new();
        let mut source = CaptureSource::audio(Box::new(RecordingMicrophone::new(log)), None);
        let (surface, _frames) = InputSurface::new(16, 16);

        assert!(matches!(
            source.bind(EncoderInput::Surface(surface)),
            Err(EngineError::InputMismatch)
        ));
    }

    #[test]
    fn test_release_steps_run_once() {
        let log = CallLog::new();
        let mut source = CaptureSource::video(
            Box::new(RecordingDisplay::new(log.clone())),
            Some(Box::new(RecordingProjection::new(log.clone()))),
            1,
        );
        let (surface, _frames) = InputSurface::new(16, 16);
        source.bind(EncoderInput::Surface(surface)).unwrap();

        assert!(source.release_binding().unwrap());
        assert!(!source.release_binding().unwrap());
        assert!(source.release_projection().unwrap());
        assert!(!source.release_projection().unwrap());
        assert_eq!(
            log.calls(),
            vec![
                Call::BindCapture(MediaKind::Video),
                Call::ReleaseCapture(MediaKind::Video),
                Call::StopProjection,
            ]
        );
    }

    #[test]
    fn test_audio_bind_selects_device() {
        let log = CallLog::new();
        let mut source = CaptureSource::audio(
            Box::new(RecordingMicrophone::new(log)),
            Some("usb:headset".to_string()),
        );
        let (queue, _samples) = SampleQueue::new(44_100, 1);

        assert!(matches!(
            source.bind(EncoderInput::Samples(queue)),
            Err(EngineError::Capture(CaptureError::DeviceNotFound(_)))
        ));
    }

    #[test]
    fn test_synthetic_factory_checks_device() {
        let mut factory = SyntheticCaptures;
        let settings = AudioSettings {
            device: Some("usb:headset".to_string()),
            ..Default::default()
        };
        assert!(factory.audio_source(&settings).is_err());
        assert_eq!(
            factory
                .video_source(&VideoSettings::default())
                .unwrap()
                .kind(),
            MediaKind::Video
        );
    }
}
