//! Per-session counters.

use std::sync::atomic::{AtomicU64, Ordering};

use livepush_encoder::{SkipReason, StepOutcome};
use livepush_ipc::{MediaKind, SessionStats};

/// Counters updated by a worker loop and read from any thread.
#[derive(Debug, Default)]
pub struct SessionCounters {
    polls: AtomicU64,
    idle_polls: AtomicU64,
    headers_sent: AtomicU64,
    frames_forwarded: AtomicU64,
    bytes_forwarded: AtomicU64,
    config_skips: AtomicU64,
    empty_skips: AtomicU64,
    header_failures: AtomicU64,
    sink_failures: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one loop iteration.
    pub fn record(&self, outcome: &StepOutcome) {
        self.polls.fetch_add(1, Ordering::Relaxed);

        let counter = match outcome {
            StepOutcome::Idle => &self.idle_polls,
            StepOutcome::HeaderSent => &self.headers_sent,
            StepOutcome::HeaderFailed(_) => &self.header_failures,
            StepOutcome::Forwarded { bytes, .. } => {
                self.bytes_forwarded
                    .fetch_add(*bytes as u64, Ordering::Relaxed);
                &self.frames_forwarded
            }
            StepOutcome::Skipped {
                reason: SkipReason::CodecConfig,
                ..
            } => &self.config_skips,
            StepOutcome::Skipped { .. } => &self.empty_skips,
            StepOutcome::SinkFailed { .. } => &self.sink_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for a poll that failed outright.
    pub fn record_failed_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the counters.
    pub fn snapshot(&self, kind: MediaKind) -> SessionStats {
        SessionStats {
            kind,
            polls: self.polls.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
            headers_sent: self.headers_sent.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            config_skips: self.config_skips.load(Ordering::Relaxed),
            empty_skips: self.empty_skips.load(Ordering::Relaxed),
            header_failures: self.header_failures.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepush_encoder::HeaderExtractionError;
    use livepush_ipc::SinkError;

    #[test]
    fn test_outcomes_land_in_their_counters() {
        let counters = SessionCounters::new();
        counters.record(&StepOutcome::Idle);
        counters.record(&StepOutcome::HeaderSent);
        counters.record(&StepOutcome::Forwarded {
            bytes: 128,
            end_of_stream: false,
        });
        counters.record(&StepOutcome::Forwarded {
            bytes: 72,
            end_of_stream: false,
        });
        counters.record(&StepOutcome::Skipped {
            reason: SkipReason::CodecConfig,
            end_of_stream: false,
        });
        counters.record(&StepOutcome::Skipped {
            reason: SkipReason::Empty,
            end_of_stream: true,
        });
        counters.record(&StepOutcome::HeaderFailed(
            HeaderExtractionError::MissingRange {
                kind: MediaKind::Video,
                key: "csd-1",
            },
        ));
        counters.record(&StepOutcome::SinkFailed {
            error: SinkError::Congested,
            end_of_stream: false,
        });
        counters.record_failed_poll();

        let stats = counters.snapshot(MediaKind::Video);
        assert_eq!(stats.kind, MediaKind::Video);
        assert_eq!(stats.polls, 9);
        assert_eq!(stats.idle_polls, 1);
        assert_eq!(stats.headers_sent, 1);
        assert_eq!(stats.frames_forwarded, 2);
        assert_eq!(stats.bytes_forwarded, 200);
        assert_eq!(stats.config_skips, 1);
        assert_eq!(stats.empty_skips, 1);
        assert_eq!(stats.header_failures, 1);
        assert_eq!(stats.sink_failures, 1);
    }
}
