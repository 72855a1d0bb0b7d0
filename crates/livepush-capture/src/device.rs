//! Audio device enumeration.

use tracing::{debug, instrument};

use livepush_ipc::AudioDevice;

use crate::error::CaptureError;
use crate::CaptureResult;

/// Identifier of the synthetic tone generator.
pub const TONE_DEVICE_ID: &str = "synthetic:tone";

/// Identifier of the synthetic silence generator.
const SILENCE_DEVICE_ID: &str = "synthetic:silence";

/// Enumerate the synthetic input devices.
#[instrument(name = "enumerate_audio_devices")]
pub fn synthetic_devices() -> Vec<AudioDevice> {
    let devices = vec![
        AudioDevice {
            id: TONE_DEVICE_ID.to_string(),
            name: "Test tone (440 Hz)".to_string(),
            is_default: true,
        },
        AudioDevice {
            id: SILENCE_DEVICE_ID.to_string(),
            name: "Silence".to_string(),
            is_default: false,
        },
    ];

    debug!(count = devices.len(), "Enumerated audio devices");
    devices
}

/// Find a device by id in `devices`; `None` resolves to the default device.
pub fn find_device_by_id(devices: &[AudioDevice], id: Option<&str>) -> CaptureResult<AudioDevice> {
    let found = match id {
        Some(id) => devices.iter().find(|d| d.id == id),
        None => devices.iter().find(|d| d.is_default).or(devices.first()),
    };

    found
        .cloned()
        .ok_or_else(|| CaptureError::DeviceNotFound(id.unwrap_or("default").to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_device_is_tone() {
        let devices = synthetic_devices();
        let device = find_device_by_id(&devices, None).unwrap();
        assert_eq!(device.id, TONE_DEVICE_ID);
    }

    #[test]
    fn test_find_by_id() {
        let devices = synthetic_devices();
        let device = find_device_by_id(&devices, Some(SILENCE_DEVICE_ID)).unwrap();
        assert!(!device.is_default);
    }

    #[test]
    fn test_unknown_device() {
        let devices = synthetic_devices();
        assert!(matches!(
            find_device_by_id(&devices, Some("usb:headset")),
            Err(CaptureError::DeviceNotFound(id)) if id == "usb:headset"
        ));
    }

    #[test]
    fn test_no_devices() {
        assert!(find_device_by_id(&[], None).is_err());
    }
}
