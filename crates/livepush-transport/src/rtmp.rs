//! RTMP publishing sink.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ClientSession, ClientSessionConfig, ClientSessionEvent, ClientSessionResult,
    PublishRequestType,
};
use rml_rtmp::time::RtmpTimestamp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

use livepush_ipc::{MediaKind, SinkError, SinkResult, SinkSession, StreamSink, VideoInfo};

use crate::connection::ConnectionState;
use crate::error::TransportError;
use crate::flv::{build_flv_audio_tag, video_frame, video_sequence_header, TimestampMapper};
use crate::{TransportResult, DEFAULT_RTMP_PORT, PACKET_CHANNEL_CAPACITY};

/// A message queued for the publisher task.
#[derive(Debug, Clone)]
struct RtmpPacket {
    kind: MediaKind,

    /// FLV tag body.
    data: Bytes,

    /// Timestamp in milliseconds.
    timestamp_ms: u32,

    /// Key frames and sequence headers must not be dropped by the session.
    essential: bool,
}

/// Transport statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStatistics {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    bytes_sent: AtomicU64,
    packets_sent: AtomicU64,
    packets_dropped: AtomicU64,
}

/// A live connection: the runtime driving it and the queue feeding it.
struct Publisher {
    session: SinkSession,
    runtime: Runtime,
    sender: Sender<RtmpPacket>,
    should_stop: Arc<AtomicBool>,
}

impl Publisher {
    fn shutdown(self) {
        self.should_stop.store(true, Ordering::SeqCst);
        drop(self.sender);
        self.runtime.shutdown_timeout(Duration::from_secs(5));
    }
}

/// Validate an RTMP URL: `rtmp://host[:port]/app`.
pub fn validate_url(url: &str) -> TransportResult<Url> {
    let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    if parsed.scheme() != "rtmp" {
        return Err(TransportError::InvalidUrl(
            "URL must start with rtmp://".to_string(),
        ));
    }
    if parsed.host_str().is_none() {
        return Err(TransportError::InvalidUrl("Missing host".to_string()));
    }
    if parsed.path().trim_matches('/').is_empty() {
        return Err(TransportError::InvalidUrl(
            "Missing application name in URL path".to_string(),
        ));
    }
    Ok(parsed)
}

/// A [`StreamSink`] that publishes one live stream over RTMP.
///
/// Calls never block on the network: tags are queued on a bounded channel
/// drained by a publisher task. A full queue drops the tag and reports
/// [`SinkError::Congested`]. There is a single connection attempt per
/// `open`.
pub struct RtmpSink {
    active: Mutex<Option<Publisher>>,
    state: Arc<RwLock<ConnectionState>>,
    timestamps: Mutex<TimestampMapper>,
    video_info: RwLock<Option<VideoInfo>>,
    counters: Arc<Counters>,
    next_session: AtomicU64,
}

impl RtmpSink {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            timestamps: Mutex::new(TimestampMapper::new()),
            video_info: RwLock::new(None),
            counters: Arc::new(Counters::default()),
            next_session: AtomicU64::new(1),
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    /// The geometry announced through `init_video_info`.
    pub fn video_info(&self) -> Option<VideoInfo> {
        *self.video_info.read()
    }

    /// Get transport statistics.
    pub fn statistics(&self) -> TransportStatistics {
        TransportStatistics {
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            packets_dropped: self.counters.packets_dropped.load(Ordering::Relaxed),
        }
    }

    fn attach(&self, runtime: Runtime, sender: Sender<RtmpPacket>, should_stop: Arc<AtomicBool>) -> SinkSession {
        let session = SinkSession(self.next_session.fetch_add(1, Ordering::SeqCst));
        self.timestamps.lock().reset();
        *self.active.lock() = Some(Publisher {
            session,
            runtime,
            sender,
            should_stop,
        });
        session
    }

    fn enqueue(&self, packet: RtmpPacket) -> SinkResult<()> {
        let active = self.active.lock();
        let publisher = active.as_ref().ok_or(SinkError::NotOpen)?;

        match publisher.sender.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(packet)) => {
                self.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(kind = %packet.kind, "Outgoing queue full, dropping tag");
                Err(TransportError::QueueFull.into())
            }
            Err(TrySendError::Disconnected(_)) => Err(TransportError::ChannelDisconnected.into()),
        }
    }

    fn ensure_open(&self) -> SinkResult<()> {
        if self.active.lock().is_some() {
            Ok(())
        } else {
            Err(SinkError::NotOpen)
        }
    }
}

impl Default for RtmpSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RtmpSink {
    fn drop(&mut self) {
        if let Some(publisher) = self.active.lock().take() {
            publisher.shutdown();
        }
    }
}

impl StreamSink for RtmpSink {
    #[instrument(name = "rtmp_open", skip(self))]
    fn open(&self, url: &str, name: &str) -> SinkResult<SinkSession> {
        if self.active.lock().is_some() {
            return Err(TransportError::AlreadyConnected.into());
        }
        let parsed = validate_url(url)?;

        info!(url = %url, stream = %name, "Connecting to RTMP server");
        *self.state.write() = ConnectionState::Connecting;

        let runtime = Runtime::new().map_err(TransportError::Io)?;
        let connection = match runtime.block_on(connect_rtmp(&parsed, name)) {
            Ok(connection) => connection,
            Err(e) => {
                warn!("RTMP connection failed: {}", e);
                *self.state.write() = ConnectionState::Failed {
                    reason: e.to_string(),
                };
                return Err(e.into());
            }
        };
        *self.state.write() = ConnectionState::Publishing;

        let (sender, receiver) = crossbeam_channel::bounded(PACKET_CHANNEL_CAPACITY);
        let should_stop = Arc::new(AtomicBool::new(false));

        let stop = Arc::clone(&should_stop);
        let state = Arc::clone(&self.state);
        let counters = Arc::clone(&self.counters);
        runtime.spawn(async move {
            if let Err(e) = run_publisher(connection, receiver, stop, counters).await {
                error!("RTMP publisher error: {}", e);
                *state.write() = ConnectionState::Failed {
                    reason: e.to_string(),
                };
            }
        });

        let session = self.attach(runtime, sender, should_stop);
        info!(session = session.0, "RTMP stream open");
        Ok(session)
    }

    #[instrument(name = "rtmp_close", skip(self))]
    fn close(&self, session: SinkSession) -> SinkResult<()> {
        let publisher = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(publisher) if publisher.session == session => active.take(),
                _ => None,
            }
        }
        .ok_or(SinkError::NotOpen)?;

        publisher.shutdown();
        *self.state.write() = ConnectionState::Disconnected;
        info!(session = session.0, "RTMP stream closed");
        Ok(())
    }

    fn init_video_info(&self, info: VideoInfo) -> SinkResult<()> {
        debug!(width = info.width, height = info.height, fps = info.fps, "Video info set");
        *self.video_info.write() = Some(info);
        Ok(())
    }

    fn init_video_header(&self, sps: &[u8], pps: &[u8]) -> SinkResult<()> {
        self.ensure_open()?;
        let tag = video_sequence_header(sps, pps).ok_or_else(|| {
            SinkError::Rejected(format!(
                "unusable parameter sets ({} byte SPS, {} byte PPS)",
                sps.len(),
                pps.len()
            ))
        })?;

        debug!(bytes = tag.len(), "Queueing AVC sequence header");
        self.enqueue(RtmpPacket {
            kind: MediaKind::Video,
            data: tag,
            timestamp_ms: 0,
            essential: true,
        })
    }

    fn init_audio_header(&self, config: &[u8]) -> SinkResult<()> {
        self.ensure_open()?;
        if config.is_empty() {
            return Err(SinkError::Rejected("empty AudioSpecificConfig".to_string()));
        }

        debug!(bytes = config.len(), "Queueing AAC sequence header");
        self.enqueue(RtmpPacket {
            kind: MediaKind::Audio,
            data: build_flv_audio_tag(config, true),
            timestamp_ms: 0,
            essential: true,
        })
    }

    fn push_video_data(&self, timestamp: i64, data: Bytes) -> SinkResult<()> {
        self.ensure_open()?;
        let (tag, keyframe) = video_frame(&data)
            .ok_or_else(|| SinkError::Rejected("access unit holds no slice data".to_string()))?;
        let timestamp_ms = self.timestamps.lock().to_rtmp_ms(timestamp);

        self.enqueue(RtmpPacket {
            kind: MediaKind::Video,
            data: tag,
            timestamp_ms,
            essential: keyframe,
        })
    }

    fn push_audio_data(&self, timestamp: i64, data: Bytes) -> SinkResult<()> {
        self.ensure_open()?;
        let timestamp_ms = self.timestamps.lock().to_rtmp_ms(timestamp);

        self.enqueue(RtmpPacket {
            kind: MediaKind::Audio,
            data: build_flv_audio_tag(&data, false),
            timestamp_ms,
            essential: true,
        })
    }
}

/// Drain the queue into the connection until it closes or a send fails.
async fn run_publisher(
    mut connection: RtmpConnection,
    receiver: Receiver<RtmpPacket>,
    should_stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
) -> TransportResult<()> {
    while !should_stop.load(Ordering::SeqCst) {
        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(packet) => {
                send_packet(&mut connection, &packet).await?;
                counters
                    .bytes_sent
                    .fetch_add(packet.data.len() as u64, Ordering::Relaxed);
                counters.packets_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Packet channel disconnected");
                break;
            }
        }
    }

    Ok(())
}

/// RTMP connection with session state.
struct RtmpConnection {
    stream: TcpStream,
    session: ClientSession,
}

impl RtmpConnection {
    async fn write_result(&mut self, result: ClientSessionResult) -> TransportResult<()> {
        if let ClientSessionResult::OutboundResponse(packet) = result {
            self.stream.write_all(&packet.bytes).await?;
        }
        Ok(())
    }

    /// Read from the server until `accept` matches a raised event, for at
    /// most `attempts` 100ms rounds.
    async fn await_event(
        &mut self,
        attempts: usize,
        what: &str,
        accept: impl Fn(&ClientSessionEvent) -> TransportResult<bool>,
    ) -> TransportResult<()> {
        let mut read_buf = vec![0u8; 4096];

        for _ in 0..attempts {
            tokio::select! {
                result = self.stream.read(&mut read_buf) => {
                    let n = result?;
                    if n == 0 {
                        return Err(TransportError::Connection("Connection closed".to_string()));
                    }

                    let results = self
                        .session
                        .handle_input(&read_buf[..n])
                        .map_err(|e| TransportError::Connection(format!("Session input error: {:?}", e)))?;

                    let mut accepted = false;
                    for result in results {
                        match result {
                            ClientSessionResult::RaisedEvent(event) => {
                                trace!("Received event: {:?}", event);
                                accepted |= accept(&event)?;
                            }
                            other => self.write_result(other).await?,
                        }
                    }
                    if accepted {
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => continue,
            }
        }

        Err(TransportError::Connection(format!("Timeout waiting for {}", what)))
    }
}

async fn connect_rtmp(url: &Url, stream_key: &str) -> TransportResult<RtmpConnection> {
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidUrl("Missing host".to_string()))?;
    let port = url.port().unwrap_or(DEFAULT_RTMP_PORT);
    let app_name = url.path().trim_matches('/').to_string();

    info!(host = %host, port, app = %app_name, "Opening TCP connection");
    let mut stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| TransportError::Connection(format!("TCP connect failed: {}", e)))?;

    let leftover = handshake(&mut stream).await?;

    let (session, initial_results) = ClientSession::new(ClientSessionConfig::new())
        .map_err(|e| TransportError::Connection(format!("Session creation failed: {:?}", e)))?;
    let mut connection = RtmpConnection { stream, session };

    for result in initial_results {
        connection.write_result(result).await?;
    }
    if !leftover.is_empty() {
        let results = connection
            .session
            .handle_input(&leftover)
            .map_err(|e| TransportError::Connection(format!("Session input error: {:?}", e)))?;
        for result in results {
            connection.write_result(result).await?;
        }
    }

    debug!(app = %app_name, "Requesting RTMP connection");
    let request = connection
        .session
        .request_connection(app_name)
        .map_err(|e| TransportError::Connection(format!("Connection request failed: {:?}", e)))?;
    connection.write_result(request).await?;
    connection
        .await_event(50, "connection acceptance", |event| match event {
            ClientSessionEvent::ConnectionRequestAccepted => Ok(true),
            ClientSessionEvent::ConnectionRequestRejected { description } => Err(
                TransportError::Connection(format!("Connection rejected: {}", description)),
            ),
            _ => Ok(false),
        })
        .await?;

    debug!(stream_key = %stream_key, "Requesting publish");
    let request = connection
        .session
        .request_publishing(stream_key.to_string(), PublishRequestType::Live)
        .map_err(|e| TransportError::Connection(format!("Publish request failed: {:?}", e)))?;
    connection.write_result(request).await?;
    connection
        .await_event(30, "publish acceptance", |event| {
            Ok(matches!(event, ClientSessionEvent::PublishRequestAccepted))
        })
        .await?;

    info!("RTMP connection established and publishing started");
    Ok(connection)
}

/// Client side of the RTMP handshake. Returns bytes read past its end.
async fn handshake(stream: &mut TcpStream) -> TransportResult<Vec<u8>> {
    let mut handshake = Handshake::new(PeerType::Client);
    let p0_p1 = handshake
        .generate_outbound_p0_and_p1()
        .map_err(|e| TransportError::Connection(format!("Handshake generation failed: {:?}", e)))?;
    stream.write_all(&p0_p1).await?;

    let mut buf = vec![0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::Connection(
                "Connection closed during handshake".to_string(),
            ));
        }

        match handshake.process_bytes(&buf[..n]) {
            Ok(HandshakeProcessResult::InProgress { response_bytes }) => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await?;
                }
            }
            Ok(HandshakeProcessResult::Completed {
                response_bytes,
                remaining_bytes,
            }) => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await?;
                }
                debug!("Handshake complete");
                return Ok(remaining_bytes);
            }
            Err(e) => {
                return Err(TransportError::Connection(format!(
                    "Handshake failed: {:?}",
                    e
                )));
            }
        }
    }
}

async fn send_packet(connection: &mut RtmpConnection, packet: &RtmpPacket) -> TransportResult<()> {
    let timestamp = RtmpTimestamp::new(packet.timestamp_ms);
    let can_be_dropped = !packet.essential;

    let result = match packet.kind {
        MediaKind::Video => {
            connection
                .session
                .publish_video_data(packet.data.clone(), timestamp, can_be_dropped)
        }
        MediaKind::Audio => {
            connection
                .session
                .publish_audio_data(packet.data.clone(), timestamp, can_be_dropped)
        }
    }
    .map_err(|e| TransportError::Send(format!("Failed to publish data: {:?}", e)))?;

    connection.write_result(result).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached_sink(capacity: usize) -> (RtmpSink, SinkSession, Receiver<RtmpPacket>) {
        let sink = RtmpSink::new();
        let runtime = Runtime::new().unwrap();
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        let session = sink.attach(runtime, sender, Arc::new(AtomicBool::new(false)));
        (sink, session, receiver)
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("rtmp://192.168.1.33/live").is_ok());
        assert_eq!(
            validate_url("rtmp://example.com:1936/live").unwrap().port(),
            Some(1936)
        );
        assert!(validate_url("http://example.com/live").is_err());
        assert!(validate_url("rtmp://example.com").is_err());
        assert!(validate_url("not a url").is_err());
    }

    #[test]
    fn test_open_rejects_bad_url_without_connecting() {
        let sink = RtmpSink::new();
        assert!(matches!(
            sink.open("http://example.com/live", "push"),
            Err(SinkError::Rejected(_))
        ));
        assert_eq!(sink.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_calls_before_open() {
        let sink = RtmpSink::new();
        assert_eq!(sink.push_video_data(0, Bytes::new()), Err(SinkError::NotOpen));
        assert_eq!(sink.init_audio_header(&[0x12, 0x08]), Err(SinkError::NotOpen));
        assert_eq!(sink.close(SinkSession(1)), Err(SinkError::NotOpen));

        // Video info is accepted at any time.
        let info = VideoInfo {
            width: 1920,
            height: 1080,
            fps: 60,
        };
        sink.init_video_info(info).unwrap();
        assert_eq!(sink.video_info(), Some(info));
    }

    #[test]
    fn test_headers_and_frames_are_packaged() {
        let (sink, _session, receiver) = attached_sink(8);

        sink.init_video_header(&[0x67, 0x42, 0x00, 0x1E], &[0x68, 0xCE]).unwrap();
        sink.init_audio_header(&[0x12, 0x08]).unwrap();
        sink.push_video_data(
            2_000_000_000,
            Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x65, 0x88]),
        )
        .unwrap();
        sink.push_audio_data(2_023_000_000, Bytes::from_static(&[0x21, 0x10]))
            .unwrap();

        let video_header = receiver.try_recv().unwrap();
        assert_eq!(video_header.kind, MediaKind::Video);
        assert_eq!(&video_header.data[..2], &[0x17, 0x00]);

        let audio_header = receiver.try_recv().unwrap();
        assert_eq!(audio_header.data.as_ref(), &[0xAF, 0x00, 0x12, 0x08]);

        let frame = receiver.try_recv().unwrap();
        assert!(frame.essential);
        assert_eq!(frame.timestamp_ms, 0);
        assert_eq!(&frame.data[..2], &[0x17, 0x01]);

        let audio = receiver.try_recv().unwrap();
        assert_eq!(audio.timestamp_ms, 23);
        assert_eq!(audio.data.as_ref(), &[0xAF, 0x01, 0x21, 0x10]);
    }

    #[test]
    fn test_full_queue_is_congestion() {
        let (sink, _session, _receiver) = attached_sink(1);
        sink.push_audio_data(0, Bytes::from_static(&[1])).unwrap();

        assert_eq!(
            sink.push_audio_data(1_000_000, Bytes::from_static(&[2])),
            Err(SinkError::Congested)
        );
        assert_eq!(sink.statistics().packets_dropped, 1);
    }

    #[test]
    fn test_payload_without_slices_is_rejected() {
        let (sink, _session, _receiver) = attached_sink(4);
        assert!(matches!(
            sink.push_video_data(0, Bytes::from_static(&[0x00, 0x00, 0x01, 0x67, 0x42])),
            Err(SinkError::Rejected(_))
        ));
    }

    #[test]
    fn test_close_matches_session() {
        let (sink, session, _receiver) = attached_sink(4);
        assert_eq!(
            sink.close(SinkSession(session.0 + 1)),
            Err(SinkError::NotOpen)
        );
        sink.close(session).unwrap();
        assert_eq!(sink.state(), ConnectionState::Disconnected);
        assert_eq!(sink.push_audio_data(0, Bytes::new()), Err(SinkError::NotOpen));
    }
}
