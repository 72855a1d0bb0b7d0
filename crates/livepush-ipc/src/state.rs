//! Lifecycle state machine types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::StreamConfig;

/// The kind of media an encoder session produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// H.264 video from the screen surface.
    Video,

    /// AAC audio from the microphone.
    Audio,
}

impl MediaKind {
    /// Returns a lowercase name, used as a log field and thread name suffix.
    pub fn name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The lifecycle of a single capture session.
///
/// Sessions move strictly forward: `Idle → Configuring → Capturing →
/// Draining → Released`. A session that fails while configuring skips
/// straight to `Draining` so its teardown still runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing has been requested yet.
    #[default]
    Idle,

    /// The encoder is being requested and configured.
    Configuring,

    /// The poll loop is running.
    Capturing,

    /// The poll loop has exited and resources are being released.
    Draining,

    /// All resources have been released. Terminal.
    Released,
}

impl SessionState {
    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Configuring)
                | (Self::Idle, Self::Released)
                | (Self::Configuring, Self::Capturing)
                | (Self::Configuring, Self::Draining)
                | (Self::Capturing, Self::Draining)
                | (Self::Draining, Self::Released)
        )
    }

    /// Returns true once the session reached its terminal state.
    pub fn is_released(self) -> bool {
        matches!(self, Self::Released)
    }

    /// Returns true while the poll loop may be running.
    pub fn is_capturing(self) -> bool {
        matches!(self, Self::Capturing)
    }

    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Configuring => "Configuring",
            Self::Capturing => "Capturing",
            Self::Draining => "Draining",
            Self::Released => "Released",
        }
    }
}

/// Teardown steps, in the order they must run.
///
/// The encoder has to be fully stopped before the surface it writes into is
/// released, and the capture source may only go once the encoder no longer
/// reads from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeardownStep {
    /// Stop the encoder.
    StopEncoder,

    /// Free all encoder resources.
    ReleaseEncoder,

    /// Release the capture binding (virtual display or microphone).
    ReleaseCapture,

    /// Release the projection the capture source depended on.
    ReleaseProjection,
}

impl TeardownStep {
    /// The first step of every teardown.
    pub const FIRST: TeardownStep = TeardownStep::StopEncoder;

    /// Returns the next step, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::StopEncoder => Some(Self::ReleaseEncoder),
            Self::ReleaseEncoder => Some(Self::ReleaseCapture),
            Self::ReleaseCapture => Some(Self::ReleaseProjection),
            Self::ReleaseProjection => None,
        }
    }

    /// Returns the display name for this step.
    pub fn name(self) -> &'static str {
        match self {
            Self::StopEncoder => "Stopping encoder",
            Self::ReleaseEncoder => "Releasing encoder",
            Self::ReleaseCapture => "Releasing capture",
            Self::ReleaseProjection => "Releasing projection",
        }
    }
}

/// Why a session's poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// The quit signal was observed.
    QuitRequested,

    /// The encoder emitted an end-of-stream buffer.
    EndOfStream,

    /// The session never reached `Capturing`.
    NotStarted { message: String },

    /// The loop failed with an unrecoverable error or panicked.
    Fault { message: String },
}

impl ExitReason {
    /// Returns true if the loop ended on a fault.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. } | Self::NotStarted { .. })
    }
}

/// The current state of the engine as a whole.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum EngineState {
    /// Not streaming.
    #[default]
    Idle,

    /// Sink open, sessions running.
    Live {
        /// Active stream configuration.
        config: StreamConfig,
    },

    /// Sessions are being torn down.
    Stopping,
}

impl EngineState {
    /// Returns true if the engine is in the Idle state.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the engine is currently live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Live { .. } => "Live",
            Self::Stopping => "Stopping",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_forward_path() {
        let path = [
            SessionState::Idle,
            SessionState::Configuring,
            SessionState::Capturing,
            SessionState::Draining,
            SessionState::Released,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_session_state_rejects_backwards() {
        assert!(!SessionState::Capturing.can_transition_to(SessionState::Configuring));
        assert!(!SessionState::Released.can_transition_to(SessionState::Idle));
        assert!(!SessionState::Released.can_transition_to(SessionState::Draining));
        assert!(!SessionState::Idle.can_transition_to(SessionState::Capturing));
    }

    #[test]
    fn test_configure_failure_can_drain() {
        assert!(SessionState::Configuring.can_transition_to(SessionState::Draining));
    }

    #[test]
    fn test_teardown_order() {
        let mut steps = vec![TeardownStep::FIRST];
        while let Some(next) = steps.last().and_then(|s| s.next()) {
            steps.push(next);
        }
        assert_eq!(
            steps,
            vec![
                TeardownStep::StopEncoder,
                TeardownStep::ReleaseEncoder,
                TeardownStep::ReleaseCapture,
                TeardownStep::ReleaseProjection,
            ]
        );
    }
}
