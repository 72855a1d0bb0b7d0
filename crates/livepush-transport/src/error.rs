//! Error types for the transport module.

use thiserror::Error;

use livepush_ipc::SinkError;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Invalid RTMP URL.
    #[error("Invalid RTMP URL: {0}")]
    InvalidUrl(String),

    /// Connecting, handshaking or publishing failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The session refused an outgoing message.
    #[error("Send error: {0}")]
    Send(String),

    /// Not connected.
    #[error("Not connected")]
    NotConnected,

    /// Already connected.
    #[error("Already connected")]
    AlreadyConnected,

    /// The outgoing queue is full.
    #[error("Outgoing queue full")]
    QueueFull,

    /// The publisher task has gone away.
    #[error("Channel disconnected")]
    ChannelDisconnected,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for SinkError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::InvalidUrl(_) | TransportError::AlreadyConnected => {
                SinkError::Rejected(error.to_string())
            }
            TransportError::NotConnected => SinkError::NotOpen,
            TransportError::QueueFull => SinkError::Congested,
            TransportError::Connection(_)
            | TransportError::Send(_)
            | TransportError::ChannelDisconnected
            | TransportError::Io(_) => SinkError::Unavailable(error.to_string()),
        }
    }
}
