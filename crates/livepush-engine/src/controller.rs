//! Capture lifecycle controller.
//!
//! One controller drives one session through
//! `Idle → Configuring → Capturing → Draining → Released`. The poll loop runs
//! on its own thread and only shares the quit flag, the sink and the
//! counters with the controller.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use livepush_encoder::{
    AudioEncoderConfig, EncoderConfig, EncoderProvider, EncoderSession, VideoEncoderConfig,
};
use livepush_ipc::{
    AudioSettings, EngineEvent, ExitReason, MediaKind, SessionState, SessionStats, StreamSink,
    VideoSettings,
};

use crate::error::EngineError;
use crate::metrics::SessionCounters;
use crate::quit::QuitSignal;
use crate::source::CaptureSource;
use crate::teardown::teardown;
use crate::worker::{SessionExit, Worker};
use crate::EngineResult;

/// Session state shared between a controller and its worker.
pub(crate) struct Lifecycle {
    kind: MediaKind,
    state: RwLock<SessionState>,
    events: Option<Sender<EngineEvent>>,
}

impl Lifecycle {
    fn new(kind: MediaKind, events: Option<Sender<EngineEvent>>) -> Self {
        Self {
            kind,
            state: RwLock::new(SessionState::Idle),
            events,
        }
    }

    pub(crate) fn kind(&self) -> MediaKind {
        self.kind
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Move to `next` if it is a legal successor.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let previous = {
            let mut state = self.state.write();
            let previous = *state;
            if !previous.can_transition_to(next) {
                warn!(
                    kind = %self.kind,
                    from = previous.name(),
                    to = next.name(),
                    "Ignoring illegal session transition"
                );
                return false;
            }
            *state = next;
            previous
        };

        debug!(
            kind = %self.kind,
            previous = previous.name(),
            current = next.name(),
            "Session state transition"
        );
        self.emit(EngineEvent::SessionStateChanged {
            kind: self.kind,
            previous,
            current: next,
        });
        true
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.try_send(event) {
                warn!("Failed to send event: {}", e);
            }
        }
    }
}

/// Drives one capture session from configuration to release.
pub struct CaptureController {
    config: EncoderConfig,
    poll_timeout: Duration,
    lifecycle: Arc<Lifecycle>,
    quit: QuitSignal,
    counters: Arc<SessionCounters>,
    capture: Option<CaptureSource>,
    worker: Option<JoinHandle<SessionExit>>,
    exit: Option<SessionExit>,
}

impl CaptureController {
    /// Create an idle controller. `events` receives state changes.
    pub fn new(
        config: EncoderConfig,
        capture: CaptureSource,
        poll_timeout: Duration,
        events: Option<Sender<EngineEvent>>,
    ) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new(config.kind(), events)),
            config,
            poll_timeout,
            quit: QuitSignal::new(),
            counters: Arc::new(SessionCounters::new()),
            capture: Some(capture),
            worker: None,
            exit: None,
        }
    }

    /// Screen capture into an H.264 encoder.
    pub fn video(
        settings: &VideoSettings,
        capture: CaptureSource,
        events: Option<Sender<EngineEvent>>,
    ) -> Self {
        Self::new(
            EncoderConfig::Video(VideoEncoderConfig::from(settings)),
            capture,
            Duration::from_micros(settings.poll_timeout_us),
            events,
        )
    }

    /// Microphone capture into an AAC encoder.
    pub fn audio(
        settings: &AudioSettings,
        capture: CaptureSource,
        events: Option<Sender<EngineEvent>>,
    ) -> Self {
        Self::new(
            EncoderConfig::Audio(AudioEncoderConfig::from(settings)),
            capture,
            Duration::from_micros(settings.poll_timeout_us),
            events,
        )
    }

    pub fn kind(&self) -> MediaKind {
        self.lifecycle.kind()
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot(self.kind())
    }

    /// How the session ended, once it has been joined.
    pub fn exit(&self) -> Option<&SessionExit> {
        self.exit.as_ref()
    }

    /// A handle that can ask this session to quit from any thread.
    pub fn quit_signal(&self) -> QuitSignal {
        self.quit.clone()
    }

    /// Configure the encoder, bind the capture source and launch the loop.
    ///
    /// If quit was already requested the session goes straight to
    /// `Released` without touching the encoder.
    #[instrument(name = "session_start", skip_all, fields(kind = %self.kind()))]
    pub fn start(
        &mut self,
        provider: &dyn EncoderProvider,
        sink: Arc<dyn StreamSink>,
    ) -> EngineResult<()> {
        let state = self.state();
        if state != SessionState::Idle {
            return Err(EngineError::InvalidTransition {
                from: state,
                to: SessionState::Configuring,
            });
        }

        if self.quit.is_set() {
            info!("Quit requested before start");
            self.release_unstarted("quit before start".to_string());
            return Ok(());
        }

        self.lifecycle.transition(SessionState::Configuring);

        let mut session = match EncoderSession::configure(self.config.clone(), provider) {
            Ok(session) => session,
            Err(e) => {
                error!("Encoder configuration failed: {}", e);
                self.abort(None, e.to_string());
                return Err(e.into());
            }
        };

        let Some(mut capture) = self.capture.take() else {
            self.abort(Some(&mut session), "capture source already consumed".to_string());
            return Err(EngineError::InvalidTransition {
                from: SessionState::Configuring,
                to: SessionState::Capturing,
            });
        };

        let bound = match session.take_input() {
            Some(input) => capture.bind(input),
            None => Err(EngineError::InputMismatch),
        };
        if let Err(e) = bound {
            error!("Capture binding failed: {}", e);
            self.capture = Some(capture);
            self.abort(Some(&mut session), e.to_string());
            return Err(e);
        }

        self.lifecycle.transition(SessionState::Capturing);

        let worker = Worker {
            session,
            capture,
            sink,
            quit: self.quit.clone(),
            counters: Arc::clone(&self.counters),
            poll_timeout: self.poll_timeout,
            lifecycle: Arc::clone(&self.lifecycle),
        };

        let handle = thread::Builder::new()
            .name(format!("livepush-{}-encoder", self.kind()))
            .spawn(move || worker.run())
            .map_err(|e| {
                // The worker was dropped with the closure; its session
                // released the codec on drop.
                self.lifecycle.transition(SessionState::Draining);
                self.lifecycle.transition(SessionState::Released);
                self.lifecycle.emit(EngineEvent::SessionFailed {
                    kind: self.lifecycle.kind(),
                    message: e.to_string(),
                });
                EngineError::Thread(e.to_string())
            })?;

        self.worker = Some(handle);
        info!("Session capturing");
        Ok(())
    }

    /// Ask the loop to stop. Safe to call any number of times.
    pub fn quit(&self) {
        self.quit.quit();
    }

    /// True once the worker thread has returned.
    pub fn is_finished(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Wait for the worker to finish its teardown.
    pub fn join(&mut self) -> Option<&SessionExit> {
        if let Some(handle) = self.worker.take() {
            let exit = handle.join().unwrap_or_else(|_| {
                error!(kind = %self.kind(), "Worker thread panicked outside the poll loop");
                SessionExit {
                    reason: ExitReason::Fault {
                        message: "worker thread panicked".to_string(),
                    },
                    teardown: Default::default(),
                }
            });
            self.exit = Some(exit);
        }
        self.exit.as_ref()
    }

    /// Quit and join. A session that never started is released here.
    pub fn stop(&mut self) -> Option<&SessionExit> {
        self.quit();
        if self.state() == SessionState::Idle {
            self.release_unstarted("stopped before start".to_string());
        }
        self.join()
    }

    fn release_unstarted(&mut self, message: String) {
        let report = match self.capture.as_mut() {
            Some(capture) => teardown(None, capture),
            None => Default::default(),
        };
        self.lifecycle.transition(SessionState::Released);
        let reason = ExitReason::NotStarted { message };
        self.lifecycle.emit(EngineEvent::SessionReleased {
            kind: self.kind(),
            reason: reason.clone(),
        });
        self.exit = Some(SessionExit {
            reason,
            teardown: report,
        });
    }

    fn abort(&mut self, session: Option<&mut EncoderSession>, message: String) {
        self.lifecycle.transition(SessionState::Draining);
        let report = match self.capture.as_mut() {
            Some(capture) => teardown(session, capture),
            None => Default::default(),
        };
        self.lifecycle.transition(SessionState::Released);

        self.lifecycle.emit(EngineEvent::SessionFailed {
            kind: self.kind(),
            message: message.clone(),
        });
        let reason = ExitReason::NotStarted { message };
        self.lifecycle.emit(EngineEvent::SessionReleased {
            kind: self.kind(),
            reason: reason.clone(),
        });
        self.exit = Some(SessionExit {
            reason,
            teardown: report,
        });
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.quit();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use crossbeam_channel::Receiver;
    use livepush_encoder::testing::{
        Call, CallLog, RecordingDisplay, RecordingMicrophone, RecordingProjection, RecordingSink,
        ScriptStep, ScriptedCodec, ScriptedProvider,
    };
    use livepush_encoder::{keys, BufferFlags, MediaFormat};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn video_controller(log: &CallLog, events: Option<Sender<EngineEvent>>) -> CaptureController {
        let capture = CaptureSource::video(
            Box::new(RecordingDisplay::new(log.clone())),
            Some(Box::new(RecordingProjection::new(log.clone()))),
            1,
        );
        let settings = VideoSettings {
            height: 1000,
            display_inset: 80,
            poll_timeout_us: 5_000,
            ..Default::default()
        };
        CaptureController::video(&settings, capture, events)
    }

    fn audio_controller(log: &CallLog) -> CaptureController {
        let capture = CaptureSource::audio(Box::new(RecordingMicrophone::new(log.clone())), None);
        let settings = AudioSettings {
            poll_timeout_us: 5_000,
            ..Default::default()
        };
        CaptureController::audio(&settings, capture, None)
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    fn position(log: &CallLog, call: Call) -> usize {
        log.position(|c| *c == call)
            .unwrap_or_else(|| panic!("{:?} not recorded", call))
    }

    fn drain(events: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
        events.try_iter().collect()
    }

    #[test]
    fn test_quit_during_poll_exits_within_timeout() {
        init_tracing();
        let log = CallLog::new();
        let provider = ScriptedProvider::new(log.clone())
            .with_codec(ScriptedCodec::new(MediaKind::Audio, log.clone()));
        let sink = Arc::new(RecordingSink::new(log.clone()));
        let mut controller = audio_controller(&log);

        controller.start(&provider, sink).unwrap();
        assert_eq!(controller.state(), SessionState::Capturing);
        assert!(wait_for(|| log.count(|c| matches!(c, Call::Dequeue(_))) >= 2));

        let quit_at = Instant::now();
        controller.quit();
        let exit = controller.join().cloned().unwrap();
        assert!(quit_at.elapsed() < Duration::from_millis(250));

        assert_eq!(exit.reason, ExitReason::QuitRequested);
        assert!(exit.teardown.is_clean());
        assert_eq!(controller.state(), SessionState::Released);

        let stop = position(&log, Call::Stop(MediaKind::Audio));
        let release = position(&log, Call::Release(MediaKind::Audio));
        let capture = position(&log, Call::ReleaseCapture(MediaKind::Audio));
        assert!(stop < release && release < capture);

        let last_poll = log
            .calls()
            .iter()
            .rposition(|c| matches!(c, Call::Dequeue(_)))
            .unwrap();
        assert!(last_poll < stop);
    }

    #[test]
    fn test_video_session_sends_header_then_payload() {
        init_tracing();
        let log = CallLog::new();
        let codec = ScriptedCodec::new(MediaKind::Video, log.clone());
        let mut format = MediaFormat::new();
        format.set_bytes(keys::CSD_0, vec![0x67, 0x42, 0x00, 0x1E]);
        format.set_bytes(keys::CSD_1, vec![0x68, 0xCE, 0x3C, 0x80]);
        codec.script().extend([
            ScriptStep::FormatChanged(format),
            ScriptStep::frame(3, vec![0xAB; 128], 33_333, BufferFlags::NONE),
            ScriptStep::frame(2, vec![0x00; 40], 0, BufferFlags::CODEC_CONFIG),
        ]);
        let provider = ScriptedProvider::new(log.clone()).with_codec(codec);
        let sink = Arc::new(RecordingSink::new(log.clone()));
        let (events_tx, events) = crossbeam_channel::unbounded();
        let mut controller = video_controller(&log, Some(events_tx));

        controller.start(&provider, sink).unwrap();
        assert!(wait_for(|| {
            let stats = controller.stats();
            stats.frames_forwarded == 1 && stats.config_skips == 1
        }));
        controller.stop();

        let calls = log.calls();
        let headers: Vec<_> = calls
            .iter()
            .filter(|c| matches!(c, Call::InitVideoHeader { .. }))
            .collect();
        assert_eq!(
            headers,
            vec![&Call::InitVideoHeader {
                sps: vec![0x67, 0x42, 0x00, 0x1E].into(),
                pps: vec![0x68, 0xCE, 0x3C, 0x80].into(),
            }]
        );

        let pushes: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::PushVideo { timestamp, data } => Some((*timestamp, data.len())),
                _ => None,
            })
            .collect();
        assert_eq!(pushes, vec![(33_333_000, 128)]);

        for index in [3, 2] {
            assert_eq!(
                log.count(|c| *c
                    == Call::ReleaseOutput {
                        kind: MediaKind::Video,
                        index
                    }),
                1
            );
        }

        assert!(
            position(&log, Call::ReleaseCapture(MediaKind::Video))
                < position(&log, Call::StopProjection)
        );

        let transitions: Vec<_> = drain(&events)
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::SessionStateChanged { current, .. } => Some(current),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                SessionState::Configuring,
                SessionState::Capturing,
                SessionState::Draining,
                SessionState::Released,
            ]
        );
    }

    #[test]
    fn test_quit_before_start_never_touches_encoder() {
        let log = CallLog::new();
        let provider = ScriptedProvider::new(log.clone())
            .with_codec(ScriptedCodec::new(MediaKind::Video, log.clone()));
        let sink = Arc::new(RecordingSink::new(log.clone()));
        let mut controller = video_controller(&log, None);

        controller.quit();
        controller.quit();
        controller.start(&provider, sink).unwrap();

        assert_eq!(controller.state(), SessionState::Released);
        assert!(matches!(
            controller.exit().map(|e| &e.reason),
            Some(ExitReason::NotStarted { .. })
        ));
        assert_eq!(log.count(|c| matches!(c, Call::CreateEncoder(_))), 0);
        assert_eq!(log.calls(), vec![Call::StopProjection]);
    }

    #[test]
    fn test_stop_before_start_releases() {
        let log = CallLog::new();
        let mut controller = audio_controller(&log);

        let exit = controller.stop().cloned().unwrap();
        assert!(matches!(exit.reason, ExitReason::NotStarted { .. }));
        assert_eq!(controller.state(), SessionState::Released);
        assert!(controller.stop().is_some());
    }

    #[test]
    fn test_configure_failure_is_reported_and_released() {
        let log = CallLog::new();
        let codec = ScriptedCodec::new(MediaKind::Video, log.clone()).failing_configure("no hw");
        let provider = ScriptedProvider::new(log.clone()).with_codec(codec);
        let sink = Arc::new(RecordingSink::new(log.clone()));
        let (events_tx, events) = crossbeam_channel::unbounded();
        let mut controller = video_controller(&log, Some(events_tx));

        assert!(matches!(
            controller.start(&provider, sink),
            Err(EngineError::Config(_))
        ));
        assert_eq!(controller.state(), SessionState::Released);
        assert_eq!(log.count(|c| matches!(c, Call::BindCapture(_))), 0);
        assert_eq!(log.count(|c| *c == Call::StopProjection), 1);

        let events = drain(&events);
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::SessionFailed {
                kind: MediaKind::Video,
                ..
            }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::SessionStateChanged {
                previous: SessionState::Configuring,
                current: SessionState::Draining,
                ..
            }
        )));
    }

    #[test]
    fn test_panic_in_loop_still_tears_down() {
        init_tracing();
        let log = CallLog::new();
        let codec = ScriptedCodec::new(MediaKind::Video, log.clone());
        codec
            .script()
            .extend([ScriptStep::TryAgainLater, ScriptStep::Panic("encoder exploded")]);
        let provider = ScriptedProvider::new(log.clone()).with_codec(codec);
        let sink = Arc::new(RecordingSink::new(log.clone()));
        let (events_tx, events) = crossbeam_channel::unbounded();
        let mut controller = video_controller(&log, Some(events_tx));

        controller.start(&provider, sink).unwrap();
        let exit = controller.join().cloned().unwrap();

        match exit.reason {
            ExitReason::Fault { message } => assert!(message.contains("encoder exploded")),
            other => panic!("unexpected exit: {:?}", other),
        }
        assert_eq!(controller.state(), SessionState::Released);

        let stop = position(&log, Call::Stop(MediaKind::Video));
        let release = position(&log, Call::Release(MediaKind::Video));
        let capture = position(&log, Call::ReleaseCapture(MediaKind::Video));
        let projection = position(&log, Call::StopProjection);
        assert!(stop < release && release < capture && capture < projection);

        assert!(drain(&events)
            .iter()
            .any(|e| matches!(e, EngineEvent::SessionFailed { .. })));
    }

    #[test]
    fn test_codec_error_ends_loop_with_fault() {
        let log = CallLog::new();
        let codec = ScriptedCodec::new(MediaKind::Audio, log.clone());
        codec.script().push(ScriptStep::Fail("device lost".to_string()));
        let provider = ScriptedProvider::new(log.clone()).with_codec(codec);
        let sink = Arc::new(RecordingSink::new(log.clone()));
        let mut controller = audio_controller(&log);

        controller.start(&provider, sink).unwrap();
        let exit = controller.join().cloned().unwrap();

        assert!(exit.reason.is_fault());
        assert_eq!(controller.stats().polls, 1);
        assert_eq!(log.count(|c| *c == Call::Release(MediaKind::Audio)), 1);
    }

    #[test]
    fn test_sink_failures_do_not_end_session() {
        let log = CallLog::new();
        let codec = ScriptedCodec::new(MediaKind::Audio, log.clone());
        codec.script().extend(
            (0..3).map(|i| ScriptStep::frame(i, vec![0x21; 8], i as i64 * 23_219, BufferFlags::NONE)),
        );
        let provider = ScriptedProvider::new(log.clone()).with_codec(codec);
        let sink = Arc::new(RecordingSink::new(log.clone()));
        sink.set_failing(true);
        let mut controller = audio_controller(&log);

        controller.start(&provider, sink).unwrap();
        assert!(wait_for(|| controller.stats().sink_failures == 3));
        assert_eq!(controller.state(), SessionState::Capturing);

        let exit = controller.stop().cloned().unwrap();
        assert_eq!(exit.reason, ExitReason::QuitRequested);
        assert_eq!(
            log.count(|c| matches!(c, Call::ReleaseOutput { .. })),
            3
        );
        assert_eq!(controller.stats().frames_forwarded, 0);
    }

    #[test]
    fn test_end_of_stream_ends_loop() {
        let log = CallLog::new();
        let codec = ScriptedCodec::new(MediaKind::Audio, log.clone());
        codec.script().extend([
            ScriptStep::frame(0, vec![0x21; 8], 0, BufferFlags::NONE),
            ScriptStep::frame(1, vec![0x21; 8], 23_219, BufferFlags::END_OF_STREAM),
        ]);
        let provider = ScriptedProvider::new(log.clone()).with_codec(codec);
        let sink = Arc::new(RecordingSink::new(log.clone()));
        let mut controller = audio_controller(&log);

        controller.start(&provider, sink).unwrap();
        let exit = controller.join().cloned().unwrap();

        assert_eq!(exit.reason, ExitReason::EndOfStream);
        assert_eq!(log.count(|c| matches!(c, Call::PushAudio { .. })), 2);
        assert_eq!(controller.state(), SessionState::Released);
        assert!(controller.is_finished());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let log = CallLog::new();
        let provider = ScriptedProvider::new(log.clone())
            .with_codec(ScriptedCodec::new(MediaKind::Audio, log.clone()));
        let sink = Arc::new(RecordingSink::new(log.clone()));
        let mut controller = audio_controller(&log);

        controller.start(&provider, sink.clone()).unwrap();
        assert!(matches!(
            controller.start(&provider, sink),
            Err(EngineError::InvalidTransition {
                from: SessionState::Capturing,
                ..
            })
        ));
        controller.stop();
        assert_eq!(log.count(|c| matches!(c, Call::CreateEncoder(_))), 1);
    }
}
