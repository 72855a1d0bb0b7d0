//! Events emitted by the engine.

use serde::{Deserialize, Serialize};

use crate::state::{EngineState, ExitReason, MediaKind, SessionState};
use crate::types::SessionStats;

/// Events that the engine can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Engine is ready to accept commands.
    Ready,

    /// Engine-level state has changed.
    StateChanged {
        previous: Box<EngineState>,
        current: Box<EngineState>,
    },

    /// A capture session moved through its lifecycle.
    SessionStateChanged {
        kind: MediaKind,
        previous: SessionState,
        current: SessionState,
    },

    /// A capture session could not be started or ended on a fault.
    SessionFailed {
        kind: MediaKind,
        message: String,
    },

    /// A capture session finished its teardown.
    SessionReleased {
        kind: MediaKind,
        reason: ExitReason,
    },

    /// Statistics snapshot for one session.
    Stats(SessionStats),

    /// Streaming stopped and the sink was closed.
    Stopped,

    /// Engine has shut down.
    Shutdown,
}
