//! The encoder poll loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use livepush_encoder::{EncoderSession, StepOutcome};
use livepush_ipc::{EngineEvent, ExitReason, SessionState, StreamSink};

use crate::controller::Lifecycle;
use crate::metrics::SessionCounters;
use crate::quit::QuitSignal;
use crate::source::CaptureSource;
use crate::teardown::{teardown, TeardownReport};

/// Interval between periodic statistics log lines.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExit {
    pub reason: ExitReason,
    pub teardown: TeardownReport,
}

/// Everything one session's thread owns.
pub(crate) struct Worker {
    pub(crate) session: EncoderSession,
    pub(crate) capture: CaptureSource,
    pub(crate) sink: Arc<dyn StreamSink>,
    pub(crate) quit: QuitSignal,
    pub(crate) counters: Arc<SessionCounters>,
    pub(crate) poll_timeout: Duration,
    pub(crate) lifecycle: Arc<Lifecycle>,
}

impl Worker {
    /// Poll until quit, end of stream or a fault, then tear down.
    #[instrument(name = "encoder_worker", skip(self), fields(kind = %self.lifecycle.kind()))]
    pub(crate) fn run(mut self) -> SessionExit {
        info!(timeout_us = self.poll_timeout.as_micros() as u64, "Poll loop starting");

        let reason = match panic::catch_unwind(AssertUnwindSafe(|| self.poll_loop())) {
            Ok(reason) => reason,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Poll loop panicked: {}", message);
                ExitReason::Fault { message }
            }
        };

        self.lifecycle.transition(SessionState::Draining);
        let report = teardown(Some(&mut self.session), &mut self.capture);
        self.lifecycle.transition(SessionState::Released);

        let stats = self.counters.snapshot(self.lifecycle.kind());
        info!(
            ?reason,
            polls = stats.polls,
            frames = stats.frames_forwarded,
            bytes = stats.bytes_forwarded,
            "Session released"
        );

        if let ExitReason::Fault { message } = &reason {
            self.lifecycle.emit(EngineEvent::SessionFailed {
                kind: self.lifecycle.kind(),
                message: message.clone(),
            });
        }
        self.lifecycle.emit(EngineEvent::SessionReleased {
            kind: self.lifecycle.kind(),
            reason: reason.clone(),
        });

        SessionExit {
            reason,
            teardown: report,
        }
    }

    fn poll_loop(&mut self) -> ExitReason {
        let mut last_log = Instant::now();

        loop {
            if self.quit.is_set() {
                debug!("Quit observed");
                return ExitReason::QuitRequested;
            }

            match self.session.step(self.poll_timeout, self.sink.as_ref()) {
                Ok(outcome) => {
                    self.counters.record(&outcome);
                    if let StepOutcome::SinkFailed { error, .. } = &outcome {
                        warn!("Sink call failed, continuing: {}", error);
                    }
                    if outcome.is_end_of_stream() {
                        return ExitReason::EndOfStream;
                    }
                }
                Err(e) => {
                    self.counters.record_failed_poll();
                    error!("Encoder failed: {}", e);
                    return ExitReason::Fault {
                        message: e.to_string(),
                    };
                }
            }

            if last_log.elapsed() >= STATS_LOG_INTERVAL {
                let stats = self.counters.snapshot(self.lifecycle.kind());
                info!(
                    polls = stats.polls,
                    frames = stats.frames_forwarded,
                    bytes = stats.bytes_forwarded,
                    sink_failures = stats.sink_failures,
                    "Session stats"
                );
                last_log = Instant::now();
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");

        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
