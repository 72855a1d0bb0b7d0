//! Commands sent to the engine.

use serde::{Deserialize, Serialize};

use crate::types::StreamConfig;

/// Commands that a controlling thread can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Open the sink and start both capture sessions.
    Start { config: StreamConfig },

    /// Quit both sessions, wait for teardown and close the sink.
    Stop,

    /// Request the current engine state.
    GetState,

    /// Request a statistics snapshot for both sessions.
    GetStats,

    /// Stop streaming if needed and exit the engine loop.
    Shutdown,
}
