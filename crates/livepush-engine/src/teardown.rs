//! Ordered, best-effort release of a session's resources.

use tracing::{debug, instrument, warn};

use livepush_encoder::{EncoderError, EncoderSession};
use livepush_ipc::TeardownStep;

use crate::source::CaptureSource;

/// What happened at one teardown step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Done,

    /// Nothing to release at this step.
    Skipped,

    Failed(String),
}

/// Per-step results, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    steps: Vec<(TeardownStep, StepResult)>,
}

impl TeardownReport {
    pub fn steps(&self) -> &[(TeardownStep, StepResult)] {
        &self.steps
    }

    pub fn result(&self, step: TeardownStep) -> Option<&StepResult> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, r)| r)
    }

    /// True when no step failed.
    pub fn is_clean(&self) -> bool {
        !self
            .steps
            .iter()
            .any(|(_, r)| matches!(r, StepResult::Failed(_)))
    }
}

/// Run every teardown step in order: stop encoder, release encoder,
/// release capture, release projection.
///
/// A failed step does not prevent the following ones.
#[instrument(name = "session_teardown", skip_all, fields(kind = %capture.kind()))]
pub fn teardown(mut session: Option<&mut EncoderSession>, capture: &mut CaptureSource) -> TeardownReport {
    let mut report = TeardownReport::default();
    let mut next = Some(TeardownStep::FIRST);

    while let Some(step) = next {
        let result = match step {
            TeardownStep::StopEncoder => encoder_step(session.as_deref_mut().map(|s| s.stop_encoder())),
            TeardownStep::ReleaseEncoder => {
                encoder_step(session.as_deref_mut().map(|s| s.release_encoder()))
            }
            TeardownStep::ReleaseCapture => capture_step(capture.release_binding()),
            TeardownStep::ReleaseProjection => capture_step(capture.release_projection()),
        };

        match &result {
            StepResult::Failed(message) => warn!(step = step.name(), "Teardown step failed: {}", message),
            _ => debug!(step = step.name(), ?result, "Teardown step"),
        }

        report.steps.push((step, result));
        next = step.next();
    }

    report
}

fn encoder_step(outcome: Option<Result<(), EncoderError>>) -> StepResult {
    match outcome {
        None | Some(Err(EncoderError::AlreadyReleased)) => StepResult::Skipped,
        Some(Ok(())) => StepResult::Done,
        Some(Err(e)) => StepResult::Failed(e.to_string()),
    }
}

fn capture_step<E: std::fmt::Display>(outcome: Result<bool, E>) -> StepResult {
    match outcome {
        Ok(true) => StepResult::Done,
        Ok(false) => StepResult::Skipped,
        Err(e) => StepResult::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepush_encoder::testing::{
        Call, CallLog, RecordingDisplay, RecordingProjection, ScriptedCodec, ScriptedProvider,
    };
    use livepush_encoder::{EncoderConfig, VideoEncoderConfig};
    use livepush_ipc::{MediaKind, VideoSettings};

    fn video_session(codec: ScriptedCodec, log: &CallLog) -> EncoderSession {
        let provider = ScriptedProvider::new(log.clone()).with_codec(codec);
        let config = EncoderConfig::Video(VideoEncoderConfig::from(&VideoSettings::default()));
        EncoderSession::configure(config, &provider).unwrap()
    }

    fn bound_source(session: &mut EncoderSession, log: &CallLog) -> CaptureSource {
        let mut source = CaptureSource::video(
            Box::new(RecordingDisplay::new(log.clone())),
            Some(Box::new(RecordingProjection::new(log.clone()))),
            1,
        );
        source.bind(session.take_input().unwrap()).unwrap();
        source
    }

    #[test]
    fn test_steps_run_in_order() {
        let log = CallLog::new();
        let mut session = video_session(ScriptedCodec::new(MediaKind::Video, log.clone()), &log);
        let mut source = bound_source(&mut session, &log);

        let report = teardown(Some(&mut session), &mut source);
        assert!(report.is_clean());
        assert_eq!(
            report.steps().iter().map(|(s, _)| *s).collect::<Vec<_>>(),
            vec![
                TeardownStep::StopEncoder,
                TeardownStep::ReleaseEncoder,
                TeardownStep::ReleaseCapture,
                TeardownStep::ReleaseProjection,
            ]
        );

        let stop = log.position(|c| *c == Call::Stop(MediaKind::Video)).unwrap();
        let release = log.position(|c| *c == Call::Release(MediaKind::Video)).unwrap();
        let capture = log
            .position(|c| *c == Call::ReleaseCapture(MediaKind::Video))
            .unwrap();
        let projection = log.position(|c| *c == Call::StopProjection).unwrap();
        assert!(stop < release && release < capture && capture < projection);
    }

    #[test]
    fn test_failed_stop_does_not_leak_the_rest() {
        let log = CallLog::new();
        let codec = ScriptedCodec::new(MediaKind::Video, log.clone()).failing_stop();
        let mut session = video_session(codec, &log);
        let mut source = bound_source(&mut session, &log);

        let report = teardown(Some(&mut session), &mut source);
        assert!(!report.is_clean());
        assert!(matches!(
            report.result(TeardownStep::StopEncoder),
            Some(StepResult::Failed(_))
        ));
        assert_eq!(report.result(TeardownStep::ReleaseEncoder), Some(&StepResult::Done));
        assert_eq!(report.result(TeardownStep::ReleaseCapture), Some(&StepResult::Done));
        assert_eq!(
            report.result(TeardownStep::ReleaseProjection),
            Some(&StepResult::Done)
        );
        assert!(session.is_released());
    }

    #[test]
    fn test_without_session_only_capture_steps_run() {
        let log = CallLog::new();
        let mut source = CaptureSource::video(
            Box::new(RecordingDisplay::new(log.clone())),
            Some(Box::new(RecordingProjection::new(log.clone()))),
            1,
        );

        let report = teardown(None, &mut source);
        assert_eq!(report.result(TeardownStep::StopEncoder), Some(&StepResult::Skipped));
        assert_eq!(report.result(TeardownStep::ReleaseCapture), Some(&StepResult::Skipped));
        assert_eq!(
            report.result(TeardownStep::ReleaseProjection),
            Some(&StepResult::Done)
        );
        assert_eq!(log.calls(), vec![Call::StopProjection]);
    }
}
