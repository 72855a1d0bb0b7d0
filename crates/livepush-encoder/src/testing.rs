//! Test doubles for encoder sessions and the pipeline around them.
//!
//! Every double records into a shared [`CallLog`], so a test can assert on
//! the order of codec, sink and capture calls across components.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use livepush_capture::{
    AudioCapture, CaptureError, CaptureResult, InputSurface, Projection, RawAudioChunk,
    RawVideoFrame, SampleQueue, VideoCapture,
};
use livepush_ipc::{
    AudioDevice, MediaKind, SinkError, SinkResult, SinkSession, StreamSink, VideoInfo,
};

use crate::codec::{
    BufferFlags, BufferInfo, Codec, CodecResult, EncoderProvider, OutputSlot, PollResult,
};
use crate::error::CodecError;
use crate::format::{keys, MediaFormat, MIME_VIDEO_AVC};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateEncoder(String),
    Configure(MediaKind),
    CreateInput(MediaKind),
    Start(MediaKind),
    Dequeue(MediaKind),
    ReleaseOutput { kind: MediaKind, index: i32 },
    Stop(MediaKind),
    Release(MediaKind),
    Open { url: String, name: String },
    Close(SinkSession),
    InitVideoInfo(VideoInfo),
    InitVideoHeader { sps: Bytes, pps: Bytes },
    InitAudioHeader(Bytes),
    PushVideo { timestamp: i64, data: Bytes },
    PushAudio { timestamp: i64, data: Bytes },
    BindCapture(MediaKind),
    ReleaseCapture(MediaKind),
    StopProjection,
}

/// An ordered, shareable record of calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    /// A snapshot of all calls so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(*c)).count()
    }

    /// Position of the first call matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls.lock().iter().position(predicate)
    }
}

/// One scripted dequeue result.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    TryAgainLater,
    FormatChanged(MediaFormat),
    Slot {
        index: i32,
        data: Bytes,
        info: BufferInfo,
    },
    Fail(String),
    Panic(&'static str),
}

impl ScriptStep {
    /// A slot whose payload is the whole of `data`.
    pub fn frame(index: i32, data: impl Into<Bytes>, timestamp_us: i64, flags: BufferFlags) -> Self {
        let data = data.into();
        ScriptStep::Slot {
            index,
            info: BufferInfo {
                offset: 0,
                size: data.len(),
                presentation_time_us: timestamp_us,
                flags,
            },
            data,
        }
    }
}

/// Shared queue of script steps; clones feed the same codec.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Arc<Mutex<VecDeque<ScriptStep>>>,
}

impl Script {
    pub fn push(&self, step: ScriptStep) {
        self.steps.lock().push_back(step);
    }

    pub fn extend(&self, steps: impl IntoIterator<Item = ScriptStep>) {
        self.steps.lock().extend(steps);
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().len()
    }

    fn next(&self) -> Option<ScriptStep> {
        self.steps.lock().pop_front()
    }
}

/// A codec that replays a script.
///
/// An exhausted script behaves like an idle encoder: each dequeue waits the
/// full timeout and reports "try again".
pub struct ScriptedCodec {
    kind: MediaKind,
    log: CallLog,
    script: Script,
    format: MediaFormat,
    input_format: MediaFormat,
    outstanding: HashMap<i32, Bytes>,
    frames: Option<Receiver<RawVideoFrame>>,
    samples: Option<Receiver<RawAudioChunk>>,
    configure_error: Option<String>,
    fail_stop: bool,
    released: bool,
}

impl ScriptedCodec {
    pub fn new(kind: MediaKind, log: CallLog) -> Self {
        Self {
            kind,
            log,
            script: Script::default(),
            format: MediaFormat::new(),
            input_format: MediaFormat::new(),
            outstanding: HashMap::new(),
            frames: None,
            samples: None,
            configure_error: None,
            fail_stop: false,
            released: false,
        }
    }

    /// Handle for feeding steps after the codec has been handed out.
    pub fn script(&self) -> Script {
        self.script.clone()
    }

    pub fn failing_configure(mut self, message: &str) -> Self {
        self.configure_error = Some(message.to_string());
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    fn dimension(&self, key: &str) -> u32 {
        self.input_format
            .integer(key)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(16)
    }
}

impl Codec for ScriptedCodec {
    fn name(&self) -> &str {
        "scripted"
    }

    fn configure(&mut self, format: &MediaFormat) -> CodecResult<()> {
        self.log.record(Call::Configure(self.kind));
        if let Some(message) = &self.configure_error {
            return Err(CodecError::Failed(message.clone()));
        }
        self.input_format = format.clone();
        Ok(())
    }

    fn create_input_surface(&mut self) -> CodecResult<InputSurface> {
        self.log.record(Call::CreateInput(self.kind));
        let (surface, frames) =
            InputSurface::new(self.dimension(keys::WIDTH), self.dimension(keys::HEIGHT));
        self.frames = Some(frames);
        Ok(surface)
    }

    fn create_sample_queue(&mut self) -> CodecResult<SampleQueue> {
        self.log.record(Call::CreateInput(self.kind));
        let channels = self
            .input_format
            .integer(keys::CHANNEL_COUNT)
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(1);
        let (queue, samples) = SampleQueue::new(self.dimension(keys::SAMPLE_RATE), channels);
        self.samples = Some(samples);
        Ok(queue)
    }

    fn start(&mut self) -> CodecResult<()> {
        self.log.record(Call::Start(self.kind));
        Ok(())
    }

    fn dequeue_output(&mut self, timeout: Duration) -> CodecResult<PollResult> {
        self.log.record(Call::Dequeue(self.kind));
        if self.released {
            return Err(CodecError::Released);
        }

        match self.script.next() {
            None => {
                thread::sleep(timeout);
                Ok(PollResult::TryAgainLater)
            }
            Some(ScriptStep::TryAgainLater) => Ok(PollResult::TryAgainLater),
            Some(ScriptStep::FormatChanged(format)) => {
                self.format = format;
                Ok(PollResult::FormatChanged)
            }
            Some(ScriptStep::Slot { index, data, info }) => {
                if index >= 0 {
                    self.outstanding.insert(index, data);
                }
                Ok(PollResult::Slot(OutputSlot { index, info }))
            }
            Some(ScriptStep::Fail(message)) => Err(CodecError::Failed(message)),
            Some(ScriptStep::Panic(message)) => panic!("{}", message),
        }
    }

    fn output_buffer(&self, index: i32) -> Option<&[u8]> {
        self.outstanding.get(&index).map(|b| b.as_ref())
    }

    fn output_format(&self) -> MediaFormat {
        self.format.clone()
    }

    fn release_output(&mut self, index: i32, _render: bool) -> CodecResult<()> {
        self.log.record(Call::ReleaseOutput {
            kind: self.kind,
            index,
        });
        self.outstanding
            .remove(&index)
            .map(|_| ())
            .ok_or(CodecError::InvalidIndex(index))
    }

    fn stop(&mut self) -> CodecResult<()> {
        self.log.record(Call::Stop(self.kind));
        if self.fail_stop {
            return Err(CodecError::Failed("scripted stop failure".to_string()));
        }
        Ok(())
    }

    fn release(&mut self) {
        self.log.record(Call::Release(self.kind));
        self.released = true;
        self.outstanding.clear();
        self.frames = None;
        self.samples = None;
    }
}

/// Hands out pre-built scripted codecs by media kind.
pub struct ScriptedProvider {
    log: CallLog,
    codecs: Mutex<Vec<ScriptedCodec>>,
}

impl ScriptedProvider {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            codecs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_codec(self, codec: ScriptedCodec) -> Self {
        self.codecs.lock().push(codec);
        self
    }
}

impl EncoderProvider for ScriptedProvider {
    fn create_encoder(&self, mime: &str) -> CodecResult<Box<dyn Codec>> {
        self.log.record(Call::CreateEncoder(mime.to_string()));
        let kind = if mime == MIME_VIDEO_AVC {
            MediaKind::Video
        } else {
            MediaKind::Audio
        };

        let mut codecs = self.codecs.lock();
        let position = codecs
            .iter()
            .position(|c| c.kind == kind)
            .ok_or_else(|| CodecError::Failed(format!("no scripted codec for {}", mime)))?;
        Ok(Box::new(codecs.remove(position)))
    }
}

/// A sink that records every call.
#[derive(Debug, Default)]
pub struct RecordingSink {
    log: CallLog,
    next_session: AtomicU64,
    failing: AtomicBool,
    refuse_open: AtomicBool,
}

impl RecordingSink {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    /// Make header and push calls fail (they are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make `open` fail.
    pub fn refuse_open(&self) {
        self.refuse_open.store(true, Ordering::SeqCst);
    }

    fn outcome(&self) -> SinkResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SinkError::Unavailable("scripted failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl StreamSink for RecordingSink {
    fn open(&self, url: &str, name: &str) -> SinkResult<SinkSession> {
        self.log.record(Call::Open {
            url: url.to_string(),
            name: name.to_string(),
        });
        if self.refuse_open.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("connection refused".to_string()));
        }
        Ok(SinkSession(self.next_session.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn close(&self, session: SinkSession) -> SinkResult<()> {
        self.log.record(Call::Close(session));
        Ok(())
    }

    fn init_video_info(&self, info: VideoInfo) -> SinkResult<()> {
        self.log.record(Call::InitVideoInfo(info));
        Ok(())
    }

    fn init_video_header(&self, sps: &[u8], pps: &[u8]) -> SinkResult<()> {
        self.log.record(Call::InitVideoHeader {
            sps: Bytes::copy_from_slice(sps),
            pps: Bytes::copy_from_slice(pps),
        });
        self.outcome()
    }

    fn init_audio_header(&self, config: &[u8]) -> SinkResult<()> {
        self.log
            .record(Call::InitAudioHeader(Bytes::copy_from_slice(config)));
        self.outcome()
    }

    fn push_video_data(&self, timestamp: i64, data: Bytes) -> SinkResult<()> {
        self.log.record(Call::PushVideo { timestamp, data });
        self.outcome()
    }

    fn push_audio_data(&self, timestamp: i64, data: Bytes) -> SinkResult<()> {
        self.log.record(Call::PushAudio { timestamp, data });
        self.outcome()
    }
}

/// A video source that records bind and release.
pub struct RecordingDisplay {
    log: CallLog,
    surface: Option<InputSurface>,
}

impl RecordingDisplay {
    pub fn new(log: CallLog) -> Self {
        Self { log, surface: None }
    }
}

impl VideoCapture for RecordingDisplay {
    fn bind(&mut self, surface: InputSurface, _dpi: u32) -> CaptureResult<()> {
        if self.surface.is_some() {
            return Err(CaptureError::AlreadyBound);
        }
        self.log.record(Call::BindCapture(MediaKind::Video));
        self.surface = Some(surface);
        Ok(())
    }

    fn is_bound(&self) -> bool {
        self.surface.is_some()
    }

    fn release(&mut self) -> CaptureResult<()> {
        self.log.record(Call::ReleaseCapture(MediaKind::Video));
        self.surface.take().map(|_| ()).ok_or(CaptureError::NotBound)
    }
}

/// An audio source that records start and release.
pub struct RecordingMicrophone {
    log: CallLog,
    queue: Option<SampleQueue>,
}

impl RecordingMicrophone {
    pub fn new(log: CallLog) -> Self {
        Self { log, queue: None }
    }
}

impl AudioCapture for RecordingMicrophone {
    fn devices(&self) -> CaptureResult<Vec<AudioDevice>> {
        Ok(vec![AudioDevice {
            id: "recording".to_string(),
            name: "Recording microphone".to_string(),
            is_default: true,
        }])
    }

    fn select_device(&mut self, id: Option<&str>) -> CaptureResult<()> {
        match id {
            None | Some("recording") => Ok(()),
            Some(other) => Err(CaptureError::DeviceNotFound(other.to_string())),
        }
    }

    fn start(&mut self, queue: SampleQueue) -> CaptureResult<()> {
        if self.queue.is_some() {
            return Err(CaptureError::AlreadyBound);
        }
        self.log.record(Call::BindCapture(MediaKind::Audio));
        self.queue = Some(queue);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.queue.is_some()
    }

    fn release(&mut self) -> CaptureResult<()> {
        self.log.record(Call::ReleaseCapture(MediaKind::Audio));
        self.queue.take().map(|_| ()).ok_or(CaptureError::NotBound)
    }
}

/// A projection that records stop.
pub struct RecordingProjection {
    log: CallLog,
}

impl RecordingProjection {
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

impl Projection for RecordingProjection {
    fn stop(&mut self) -> CaptureResult<()> {
        self.log.record(Call::StopProjection);
        Ok(())
    }
}
