//! Capture lifecycle control and the streaming engine.
//!
//! Each media kind runs as one session: a [`CaptureController`] configures
//! the encoder, binds the capture source to its input and runs the poll
//! loop on a worker thread until quit. The [`Engine`] owns the sink and both
//! controllers and is driven by [`EngineCommand`]s.

mod controller;
mod error;
mod metrics;
mod orchestrator;
mod quit;
mod source;
mod teardown;
mod worker;

pub use controller::CaptureController;
pub use error::EngineError;
pub use metrics::SessionCounters;
pub use orchestrator::Engine;
pub use quit::QuitSignal;
pub use source::{CaptureFactory, CaptureSource, SyntheticCaptures};
pub use teardown::{teardown, StepResult, TeardownReport};
pub use worker::SessionExit;

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use livepush_encoder::EncoderProvider;
use livepush_ipc::{command_channel, event_channel, EngineCommand, EngineEvent};
use livepush_transport::RtmpSink;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Create an engine publishing over RTMP, with its command and event
/// channels.
pub fn create_engine(
    provider: Arc<dyn EncoderProvider>,
    captures: Box<dyn CaptureFactory>,
) -> (Sender<EngineCommand>, Receiver<EngineEvent>, Engine) {
    let (command_tx, command_rx) = command_channel();
    let (event_tx, event_rx) = event_channel();
    let engine = Engine::new(
        command_rx,
        event_tx,
        Arc::new(RtmpSink::new()),
        provider,
        captures,
    );
    (command_tx, event_rx, engine)
}

/// [`create_engine`] with the software encoders and synthetic sources.
#[cfg(feature = "software")]
pub fn create_software_engine() -> (Sender<EngineCommand>, Receiver<EngineEvent>, Engine) {
    create_engine(
        Arc::new(livepush_encoder::software::SoftwareProvider),
        Box::new(SyntheticCaptures),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepush_encoder::testing::{CallLog, ScriptedProvider};

    #[test]
    fn test_create_engine_runs_until_shutdown() {
        let provider = Arc::new(ScriptedProvider::new(CallLog::new()));
        let (commands, events, mut engine) = create_engine(provider, Box::new(SyntheticCaptures));
        assert!(engine.state().is_idle());

        commands.send(EngineCommand::Shutdown).unwrap();
        engine.run();

        let received: Vec<_> = events.try_iter().collect();
        assert!(matches!(received.first(), Some(EngineEvent::Ready)));
        assert!(matches!(received.last(), Some(EngineEvent::Shutdown)));
    }
}
