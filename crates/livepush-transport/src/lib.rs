//! RTMP stream sink.
//!
//! [`RtmpSink`] implements [`livepush_ipc::StreamSink`]: encoder headers
//! become FLV sequence-header tags, Annex B video becomes AVCC, and
//! everything is published over an `rml_rtmp` client session.

mod connection;
mod error;
pub mod flv;
mod rtmp;

pub use connection::ConnectionState;
pub use error::TransportError;
pub use rtmp::{validate_url, RtmpSink, TransportStatistics};

/// Channel capacity for outgoing tags.
pub const PACKET_CHANNEL_CAPACITY: usize = 30;

/// Port used when the URL has none.
pub const DEFAULT_RTMP_PORT: u16 = 1935;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
