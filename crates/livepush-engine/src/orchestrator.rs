//! Main engine orchestrator.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use livepush_encoder::EncoderProvider;
use livepush_ipc::{
    EngineCommand, EngineEvent, EngineState, MediaKind, SessionStats, SinkSession, StreamConfig,
    StreamSink,
};

use crate::controller::CaptureController;
use crate::source::CaptureFactory;

/// A stream in progress: the sink session and its capture sessions.
struct ActiveStream {
    session: SinkSession,
    controllers: Vec<CaptureController>,
}

/// The streaming engine.
///
/// Owns the sink and one controller per session. Commands arrive on a
/// channel; state changes and statistics leave on another.
pub struct Engine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    state: Arc<RwLock<EngineState>>,
    sink: Arc<dyn StreamSink>,
    provider: Arc<dyn EncoderProvider>,
    captures: Box<dyn CaptureFactory>,
    active: Option<ActiveStream>,
    last_stats: Vec<SessionStats>,
}

impl Engine {
    /// Create a new engine.
    pub fn new(
        command_rx: Receiver<EngineCommand>,
        event_tx: Sender<EngineEvent>,
        sink: Arc<dyn StreamSink>,
        provider: Arc<dyn EncoderProvider>,
        captures: Box<dyn CaptureFactory>,
    ) -> Self {
        Self {
            command_rx,
            event_tx,
            state: Arc::new(RwLock::new(EngineState::Idle)),
            sink,
            provider,
            captures,
            active: None,
            last_stats: Vec::new(),
        }
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        self.state.read().clone()
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(EngineEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.state.read().is_live() {
                        self.reap_finished();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.stop_stream();
                    break;
                }
            }
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if engine should stop.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::Start { config } => self.start_stream(config),
            EngineCommand::Stop => self.stop_stream(),
            EngineCommand::GetState => self.send_state(),
            EngineCommand::GetStats => self.send_stats(),
            EngineCommand::Shutdown => {
                self.stop_stream();
                self.send_event(EngineEvent::Shutdown);
                return false;
            }
        }

        true
    }

    /// Open the sink and start both sessions.
    ///
    /// A session that fails to start is reported and does not prevent the
    /// other one from running.
    #[instrument(name = "start_stream", skip(self, config))]
    fn start_stream(&mut self, config: StreamConfig) {
        if !self.state.read().is_idle() {
            debug!("Already live, ignoring start command");
            return;
        }

        info!(url = %config.url, stream = %config.stream_name, "Starting stream");

        let session = match self.sink.open(&config.url, &config.stream_name) {
            Ok(session) => session,
            Err(e) => {
                error!("Sink open failed: {}", e);
                for kind in [MediaKind::Video, MediaKind::Audio] {
                    self.send_event(EngineEvent::SessionFailed {
                        kind,
                        message: format!("sink open failed: {}", e),
                    });
                }
                return;
            }
        };

        if let Err(e) = self.sink.init_video_info(config.video.sink_video_info()) {
            warn!("Sink refused video info: {}", e);
        }

        let mut controllers = Vec::with_capacity(2);
        match self.captures.video_source(&config.video) {
            Ok(capture) => controllers.push(CaptureController::video(
                &config.video,
                capture,
                Some(self.event_tx.clone()),
            )),
            Err(e) => self.send_event(EngineEvent::SessionFailed {
                kind: MediaKind::Video,
                message: e.to_string(),
            }),
        }
        match self.captures.audio_source(&config.audio) {
            Ok(capture) => controllers.push(CaptureController::audio(
                &config.audio,
                capture,
                Some(self.event_tx.clone()),
            )),
            Err(e) => self.send_event(EngineEvent::SessionFailed {
                kind: MediaKind::Audio,
                message: e.to_string(),
            }),
        }

        let mut started = 0;
        for controller in &mut controllers {
            match controller.start(self.provider.as_ref(), Arc::clone(&self.sink)) {
                Ok(()) => started += 1,
                Err(e) => warn!(kind = %controller.kind(), "Session failed to start: {}", e),
            }
        }

        let active = ActiveStream {
            session,
            controllers,
        };

        if started == 0 {
            error!("No session could be started");
            self.transition_to(EngineState::Stopping);
            self.finish(active);
            return;
        }

        self.active = Some(active);
        self.transition_to(EngineState::Live { config });
        info!(sessions = started, "Stream started");
    }

    /// Quit both sessions, wait for their teardown and close the sink.
    #[instrument(name = "stop_stream", skip(self))]
    fn stop_stream(&mut self) {
        let Some(active) = self.active.take() else {
            debug!("Not live, ignoring stop command");
            return;
        };

        info!("Stopping stream");
        self.transition_to(EngineState::Stopping);
        self.finish(active);
    }

    /// End the stream once every session has finished on its own.
    fn reap_finished(&mut self) {
        let all_finished = self
            .active
            .as_ref()
            .is_some_and(|active| active.controllers.iter().all(|c| c.is_finished()));

        if all_finished {
            info!("All sessions ended");
            self.stop_stream();
        }
    }

    fn finish(&mut self, mut active: ActiveStream) {
        for controller in &active.controllers {
            controller.quit();
        }
        for controller in &mut active.controllers {
            let kind = controller.kind();
            if let Some(exit) = controller.join() {
                debug!(
                    %kind,
                    reason = ?exit.reason,
                    clean = exit.teardown.is_clean(),
                    "Session joined"
                );
            }
        }

        self.last_stats = active.controllers.iter().map(|c| c.stats()).collect();
        self.send_stats();

        if let Err(e) = self.sink.close(active.session) {
            warn!("Sink close failed: {}", e);
        }

        self.transition_to(EngineState::Idle);
        self.send_event(EngineEvent::Stopped);
        info!("Stream stopped");
    }

    fn send_state(&self) {
        let state = self.state.read().clone();
        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(state.clone()),
            current: Box::new(state),
        });
    }

    fn send_stats(&self) {
        let stats = match &self.active {
            Some(active) => active.controllers.iter().map(|c| c.stats()).collect(),
            None => self.last_stats.clone(),
        };
        for snapshot in stats {
            self.send_event(EngineEvent::Stats(snapshot));
        }
    }

    fn transition_to(&self, new_state: EngineState) {
        let previous = {
            let mut state = self.state.write();
            let prev = state.clone();
            *state = new_state.clone();
            prev
        };

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            for controller in &active.controllers {
                controller.quit();
            }
            let session = active.session;
            drop(active.controllers);
            let _ = self.sink.close(session);
        }
    }
}
