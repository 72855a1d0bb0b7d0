//! One encoder instance and its output-polling step.

use std::time::Duration;

use tracing::{debug, info, instrument, trace, warn};

use livepush_ipc::{MediaKind, SinkError, StreamSink};

use crate::classifier::{classify, Disposition, SkipReason};
use crate::codec::{Codec, CodecResult, EncoderInput, EncoderProvider, PollResult};
use crate::config::EncoderConfig;
use crate::error::{EncoderConfigError, EncoderError, HeaderExtractionError};
use crate::header::{extract_header, HeaderBlob};
use crate::push::PushFrame;
use crate::EncoderResult;

/// What one [`EncoderSession::step`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing was ready within the timeout.
    Idle,

    /// A header was extracted and delivered.
    HeaderSent,

    /// The format changed but carried no usable header.
    HeaderFailed(HeaderExtractionError),

    /// A payload was handed to the sink.
    Forwarded { bytes: usize, end_of_stream: bool },

    /// A slot was released without forwarding.
    Skipped {
        reason: SkipReason,
        end_of_stream: bool,
    },

    /// The sink refused a header or payload.
    SinkFailed {
        error: SinkError,
        end_of_stream: bool,
    },
}

impl StepOutcome {
    /// True when the encoder signalled the end of its stream.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(
            self,
            StepOutcome::Forwarded { end_of_stream: true, .. }
                | StepOutcome::Skipped { end_of_stream: true, .. }
                | StepOutcome::SinkFailed { end_of_stream: true, .. }
        )
    }
}

/// A configured, running encoder.
///
/// Owns the codec exclusively. Every slot obtained through [`Self::poll`]
/// must be given back through [`Self::release`]; [`Self::step`] does both.
pub struct EncoderSession {
    kind: MediaKind,
    config: EncoderConfig,
    codec: Box<dyn Codec>,
    input: Option<EncoderInput>,
    header_sent: bool,
    end_of_stream: bool,
    stopped: bool,
    released: bool,
}

impl EncoderSession {
    /// Validate `config`, obtain a codec and start it.
    ///
    /// On success the session holds an input handle (surface for video,
    /// sample queue for audio) to be taken with [`Self::take_input`].
    #[instrument(name = "encoder_configure", skip_all, fields(kind = %config.kind()))]
    pub fn configure(
        config: EncoderConfig,
        provider: &dyn EncoderProvider,
    ) -> Result<Self, EncoderConfigError> {
        config.validate()?;

        let mime = config.mime();
        let mut codec =
            provider
                .create_encoder(mime)
                .map_err(|e| EncoderConfigError::NoEncoderAvailable {
                    mime: mime.to_string(),
                    reason: e.to_string(),
                })?;

        let input = match Self::prepare(codec.as_mut(), &config) {
            Ok(input) => input,
            Err(e) => {
                warn!(codec = codec.name(), "Encoder rejected configuration: {}", e);
                codec.release();
                return Err(EncoderConfigError::Rejected(e.to_string()));
            }
        };

        info!(codec = codec.name(), mime, "Encoder session started");

        Ok(Self {
            kind: config.kind(),
            config,
            codec,
            input: Some(input),
            header_sent: false,
            end_of_stream: false,
            stopped: false,
            released: false,
        })
    }

    fn prepare(codec: &mut dyn Codec, config: &EncoderConfig) -> CodecResult<EncoderInput> {
        let format = config.to_format();
        debug!(%format, "Configuring encoder");
        codec.configure(&format)?;

        let input = match config {
            EncoderConfig::Video(_) => EncoderInput::Surface(codec.create_input_surface()?),
            EncoderConfig::Audio(_) => EncoderInput::Samples(codec.create_sample_queue()?),
        };

        codec.start()?;
        Ok(input)
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn codec_name(&self) -> &str {
        self.codec.name()
    }

    /// True once at least one header reached the sink.
    pub fn header_sent(&self) -> bool {
        self.header_sent
    }

    /// True once a slot carrying the end-of-stream flag was processed.
    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Take the input handle for binding to a capture source.
    pub fn take_input(&mut self) -> Option<EncoderInput> {
        self.input.take()
    }

    /// Wait at most `timeout` for encoder output.
    pub fn poll(&mut self, timeout: Duration) -> EncoderResult<PollResult> {
        if self.released {
            return Err(EncoderError::AlreadyReleased);
        }
        Ok(self.codec.dequeue_output(timeout)?)
    }

    /// Give an output slot back to the encoder.
    pub fn release(&mut self, index: i32) -> EncoderResult<()> {
        if self.released {
            return Err(EncoderError::AlreadyReleased);
        }
        trace!(kind = %self.kind, index, "Releasing output slot");
        Ok(self.codec.release_output(index, false)?)
    }

    /// Read the header from the current output format.
    pub fn extract_header(&self) -> Result<HeaderBlob, HeaderExtractionError> {
        extract_header(self.kind, &self.codec.output_format())
    }

    /// One poll, classify and act iteration.
    ///
    /// Header and sink failures are reported in the outcome and leave the
    /// session usable. Errors are codec failures.
    pub fn step(&mut self, timeout: Duration, sink: &dyn StreamSink) -> EncoderResult<StepOutcome> {
        let polled = self.poll(timeout)?;
        let disposition = classify(&polled);
        trace!(kind = %self.kind, ?disposition, "Classified poll result");

        let outcome = match disposition {
            Disposition::Idle => StepOutcome::Idle,
            Disposition::ExtractHeader => self.send_header(sink),
            Disposition::Forward {
                index,
                offset,
                size,
                timestamp_us,
                end_of_stream,
            } => {
                let outcome = self.forward(index, offset, size, timestamp_us, end_of_stream, sink);
                self.release(index)?;
                outcome
            }
            Disposition::Skip {
                reason,
                end_of_stream,
                ..
            } => {
                if let Some(index) = disposition.slot_index() {
                    self.release(index)?;
                }
                debug!(kind = %self.kind, ?reason, "Slot released without forwarding");
                StepOutcome::Skipped {
                    reason,
                    end_of_stream,
                }
            }
        };

        if outcome.is_end_of_stream() {
            info!(kind = %self.kind, "Encoder reached end of stream");
            self.end_of_stream = true;
        }
        Ok(outcome)
    }

    fn send_header(&mut self, sink: &dyn StreamSink) -> StepOutcome {
        let blob = match self.extract_header() {
            Ok(blob) => blob,
            Err(e) => {
                warn!(kind = %self.kind, "Header extraction failed: {}", e);
                return StepOutcome::HeaderFailed(e);
            }
        };

        match blob.deliver(sink) {
            Ok(()) => {
                if !self.header_sent {
                    info!(kind = %self.kind, bytes = blob.len(), "Header sent");
                }
                self.header_sent = true;
                StepOutcome::HeaderSent
            }
            Err(error) => {
                warn!(kind = %self.kind, "Sink refused header: {}", error);
                StepOutcome::SinkFailed {
                    error,
                    end_of_stream: false,
                }
            }
        }
    }

    fn forward(
        &self,
        index: i32,
        offset: usize,
        size: usize,
        timestamp_us: i64,
        end_of_stream: bool,
        sink: &dyn StreamSink,
    ) -> StepOutcome {
        let copied = match self.codec.output_buffer(index) {
            Some(buffer) => PushFrame::copy_from(buffer, offset, size, timestamp_us),
            None => Err(EncoderError::InvalidRange {
                offset,
                size,
                capacity: 0,
            }),
        };

        let frame = match copied {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = %self.kind, index, "Dropping slot: {}", e);
                return StepOutcome::Skipped {
                    reason: SkipReason::OutOfRange,
                    end_of_stream,
                };
            }
        };

        let bytes = frame.len();
        match frame.push(self.kind, sink) {
            Ok(()) => StepOutcome::Forwarded {
                bytes,
                end_of_stream,
            },
            Err(error) => {
                debug!(kind = %self.kind, index, "Sink refused payload: {}", error);
                StepOutcome::SinkFailed {
                    error,
                    end_of_stream,
                }
            }
        }
    }

    /// Stop the encoder. Further polls return nothing new.
    pub fn stop_encoder(&mut self) -> EncoderResult<()> {
        if self.released {
            return Err(EncoderError::AlreadyReleased);
        }
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.codec.stop()?;
        debug!(kind = %self.kind, "Encoder stopped");
        Ok(())
    }

    /// Free the codec. The input handle, if still held, is dropped.
    pub fn release_encoder(&mut self) -> EncoderResult<()> {
        if self.released {
            return Err(EncoderError::AlreadyReleased);
        }
        self.released = true;
        self.input = None;
        self.codec.release();
        debug!(kind = %self.kind, "Encoder released");
        Ok(())
    }

    /// Stop then release. Release is attempted even if stop fails.
    pub fn stop_and_release(&mut self) -> EncoderResult<()> {
        if self.released {
            return Err(EncoderError::AlreadyReleased);
        }
        let stopped = self.stop_encoder();
        if let Err(e) = &stopped {
            warn!(kind = %self.kind, "Encoder stop failed: {}", e);
        }
        self.release_encoder()?;
        stopped
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.stop_and_release();
        }
    }
}
