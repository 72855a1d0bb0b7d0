//! Shared contracts for the livepush pipeline.
//!
//! This crate defines the types every other livepush crate agrees on: media
//! kinds, the per-session lifecycle states, the stream configuration, the
//! sink interface encoded frames are pushed into, and the command/event
//! messages exchanged with the engine.

mod commands;
mod events;
mod sink;
mod state;
mod types;

pub use commands::EngineCommand;
pub use events::EngineEvent;
pub use sink::{SinkError, SinkResult, SinkSession, StreamSink, VideoInfo};
pub use state::{EngineState, ExitReason, MediaKind, SessionState, TeardownStep};
pub use types::{
    AudioDevice, AudioSettings, SessionStats, StreamConfig, VideoSettings,
    DEFAULT_AUDIO_POLL_TIMEOUT_US, DEFAULT_VIDEO_POLL_TIMEOUT_US,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (controller → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (engine → controller).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
