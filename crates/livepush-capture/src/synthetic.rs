//! Synthetic capture sources.
//!
//! These stand in for the platform virtual display and microphone. Each
//! runs a producer thread that writes into the encoder input it was bound
//! to, paced by wall-clock time, until released.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use livepush_ipc::AudioDevice;

use crate::device::{find_device_by_id, synthetic_devices, TONE_DEVICE_ID};
use crate::error::CaptureError;
use crate::frame::{CaptureClock, RawAudioChunk, RawVideoFrame};
use crate::pattern::{bgra_to_nv12, color_bars_bgra};
use crate::surface::{InputSurface, SampleQueue};
use crate::{AudioCapture, CaptureResult, Projection, VideoCapture};

/// Audio chunk duration (10ms).
const CHUNK_DURATION: Duration = Duration::from_millis(10);

/// Tone frequency in Hz.
const TONE_HZ: f32 = 440.0;

/// Tone amplitude.
const TONE_AMPLITUDE: f32 = 0.25;

/// A producer thread plus the flag that stops it.
struct Producer {
    should_stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Producer {
    fn spawn<F>(name: String, body: F) -> CaptureResult<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let should_stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&should_stop);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || body(flag))
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        Ok(Self {
            should_stop,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Capture producer thread panicked");
            }
        }
    }
}

/// A virtual display rendering scrolling color bars.
pub struct TestPatternDisplay {
    frame_rate: u32,
    producer: Option<Producer>,
}

impl TestPatternDisplay {
    /// Create a display that renders `frame_rate` frames per second.
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.max(1),
            producer: None,
        }
    }
}

impl VideoCapture for TestPatternDisplay {
    #[instrument(name = "display_bind", skip(self, surface))]
    fn bind(&mut self, surface: InputSurface, dpi: u32) -> CaptureResult<()> {
        if self.producer.is_some() {
            return Err(CaptureError::AlreadyBound);
        }

        let (width, height) = surface.dimensions();
        info!(width, height, dpi, fps = self.frame_rate, "Binding test pattern display");

        let interval = Duration::from_nanos(1_000_000_000 / self.frame_rate as u64);
        let producer = Producer::spawn("display-pattern".to_string(), move |should_stop| {
            render_loop(surface, interval, should_stop);
        })?;

        self.producer = Some(producer);
        Ok(())
    }

    fn is_bound(&self) -> bool {
        self.producer.is_some()
    }

    #[instrument(name = "display_release", skip(self))]
    fn release(&mut self) -> CaptureResult<()> {
        match self.producer.take() {
            Some(mut producer) => {
                producer.stop();
                info!("Test pattern display released");
                Ok(())
            }
            None => Err(CaptureError::NotBound),
        }
    }
}

impl Drop for TestPatternDisplay {
    fn drop(&mut self) {
        if let Some(mut producer) = self.producer.take() {
            producer.stop();
        }
    }
}

fn render_loop(surface: InputSurface, interval: Duration, should_stop: Arc<AtomicBool>) {
    let (width, height) = surface.dimensions();
    let clock = CaptureClock::start();
    let mut sequence = 0u64;
    let mut dropped = 0u64;

    while !should_stop.load(Ordering::SeqCst) {
        let frame_start = Instant::now();

        let bgra = color_bars_bgra(width, height, sequence as u32);
        let nv12 = bgra_to_nv12(&bgra, width, height, width as usize * 4);
        let frame = RawVideoFrame {
            data: Bytes::from(nv12),
            width,
            height,
            pts_us: clock.now_us(),
            sequence,
        };

        match surface.submit(frame) {
            Ok(true) => {}
            Ok(false) => dropped += 1,
            Err(e) => {
                debug!("Display render loop ending: {}", e);
                break;
            }
        }
        sequence += 1;

        let elapsed = frame_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }

    debug!(frames = sequence, dropped, "Display render loop exited");
}

/// A microphone producing a sine tone (or silence).
pub struct ToneMicrophone {
    devices: Vec<AudioDevice>,
    selected: AudioDevice,
    producer: Option<Producer>,
}

impl ToneMicrophone {
    /// Create a microphone with the default device selected.
    pub fn new() -> Self {
        let devices = synthetic_devices();
        let selected = find_device_by_id(&devices, None).unwrap_or_else(|_| AudioDevice {
            id: TONE_DEVICE_ID.to_string(),
            name: "Test tone".to_string(),
            is_default: true,
        });

        Self {
            devices,
            selected,
            producer: None,
        }
    }

    /// The currently selected device.
    pub fn selected(&self) -> &AudioDevice {
        &self.selected
    }
}

impl Default for ToneMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCapture for ToneMicrophone {
    fn devices(&self) -> CaptureResult<Vec<AudioDevice>> {
        Ok(self.devices.clone())
    }

    fn select_device(&mut self, id: Option<&str>) -> CaptureResult<()> {
        self.selected = find_device_by_id(&self.devices, id)?;
        debug!(device = %self.selected.id, "Selected audio device");
        Ok(())
    }

    #[instrument(name = "microphone_start", skip(self, queue))]
    fn start(&mut self, queue: SampleQueue) -> CaptureResult<()> {
        if self.producer.is_some() {
            return Err(CaptureError::AlreadyBound);
        }

        let amplitude = if self.selected.id == TONE_DEVICE_ID {
            TONE_AMPLITUDE
        } else {
            0.0
        };

        info!(
            device = %self.selected.id,
            sample_rate = queue.sample_rate(),
            channels = queue.channels(),
            "Starting microphone capture"
        );

        let producer = Producer::spawn("microphone-tone".to_string(), move |should_stop| {
            tone_loop(queue, amplitude, should_stop);
        })?;

        self.producer = Some(producer);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.producer.is_some()
    }

    #[instrument(name = "microphone_release", skip(self))]
    fn release(&mut self) -> CaptureResult<()> {
        match self.producer.take() {
            Some(mut producer) => {
                producer.stop();
                info!("Microphone capture released");
                Ok(())
            }
            None => Err(CaptureError::NotBound),
        }
    }
}

impl Drop for ToneMicrophone {
    fn drop(&mut self) {
        if let Some(mut producer) = self.producer.take() {
            producer.stop();
        }
    }
}

fn tone_loop(queue: SampleQueue, amplitude: f32, should_stop: Arc<AtomicBool>) {
    let sample_rate = queue.sample_rate().max(1);
    let channels = queue.channels().max(1);
    let frames_per_chunk = (sample_rate as u64 * CHUNK_DURATION.as_millis() as u64 / 1000) as usize;
    let clock = CaptureClock::start();
    let mut phase = 0f32;
    let mut sequence = 0u64;

    while !should_stop.load(Ordering::SeqCst) {
        let chunk_start = Instant::now();

        let mut samples = Vec::with_capacity(frames_per_chunk * channels as usize);
        for _ in 0..frames_per_chunk {
            let value = (phase * TAU).sin() * amplitude;
            phase = (phase + TONE_HZ / sample_rate as f32).fract();
            samples.extend(std::iter::repeat_n(value, channels as usize));
        }

        let chunk = RawAudioChunk {
            samples,
            channels,
            pts_us: clock.now_us(),
            sequence,
        };
        sequence += 1;

        if let Err(e) = queue.submit(chunk) {
            debug!("Microphone loop ending: {}", e);
            break;
        }

        let elapsed = chunk_start.elapsed();
        if elapsed < CHUNK_DURATION {
            thread::sleep(CHUNK_DURATION - elapsed);
        }
    }

    debug!(chunks = sequence, "Microphone loop exited");
}

/// A projection with nothing behind it.
#[derive(Debug, Default)]
pub struct NullProjection {
    stopped: bool,
}

impl NullProjection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Projection for NullProjection {
    fn stop(&mut self) -> CaptureResult<()> {
        if self.stopped {
            return Err(CaptureError::ProjectionStopped);
        }
        self.stopped = true;
        debug!("Projection stopped");
        Ok(())
    }
}
