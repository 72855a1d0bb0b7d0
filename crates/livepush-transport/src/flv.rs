//! FLV tag bodies for RTMP video and audio messages.
//!
//! RTMP carries H.264 as AVCC (length-prefixed NAL units) inside FLV video
//! tags, preceded by an AVC sequence header. AAC travels as raw access
//! units inside FLV audio tags, preceded by the AudioSpecificConfig.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use livepush_encoder::nal::{contains_idr, filter_parameter_sets, parse_annex_b, NalUnit};

/// FLV audio tag header for AAC (format 10, 44 kHz, 16-bit, stereo flags
/// fixed by the FLV format for AAC).
const AAC_TAG_HEADER: u8 = 0xAF;

/// Strip a leading Annex B start code, if present.
fn strip_start_code(nal: &[u8]) -> &[u8] {
    if nal.starts_with(&[0, 0, 0, 1]) {
        &nal[4..]
    } else if nal.starts_with(&[0, 0, 1]) {
        &nal[3..]
    } else {
        nal
    }
}

/// Convert NAL units to AVCC format with 4-byte big-endian length prefixes.
pub fn nals_to_avcc(nals: &[NalUnit]) -> Bytes {
    let mut buf = BytesMut::with_capacity(nals.iter().map(|n| n.data.len() + 4).sum());
    for nal in nals {
        buf.put_u32(nal.data.len() as u32);
        buf.put_slice(&nal.data);
    }
    buf.freeze()
}

/// Build an AVCDecoderConfigurationRecord (ISO 14496-15) from one SPS and
/// one PPS. Returns `None` if the SPS is too short to carry profile and
/// level.
pub fn build_avc_decoder_config(sps: &[u8], pps: &[u8]) -> Option<Bytes> {
    let sps = strip_start_code(sps);
    let pps = strip_start_code(pps);
    if sps.len() < 4 || pps.is_empty() {
        debug!(sps_len = sps.len(), pps_len = pps.len(), "Parameter sets too short");
        return None;
    }

    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());
    buf.put_u8(0x01); // configurationVersion
    buf.put_u8(sps[1]); // AVCProfileIndication
    buf.put_u8(sps[2]); // profile_compatibility
    buf.put_u8(sps[3]); // AVCLevelIndication
    buf.put_u8(0xFF); // 4-byte NAL lengths
    buf.put_u8(0xE1); // one SPS
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);
    buf.put_u8(0x01); // one PPS
    buf.put_u16(pps.len() as u16);
    buf.put_slice(pps);

    Some(buf.freeze())
}

/// Build an FLV video tag body for H.264.
///
/// Layout: frame type and codec id (1 byte), AVC packet type (1 byte),
/// composition time offset (3 bytes), data.
pub fn build_flv_video_tag(
    data: &[u8],
    is_keyframe: bool,
    is_sequence_header: bool,
    composition_time: i32,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + data.len());

    let frame_type = if is_keyframe { 0x10 } else { 0x20 };
    buf.put_u8(frame_type | 0x07);
    buf.put_u8(if is_sequence_header { 0x00 } else { 0x01 });

    let ct = composition_time as u32;
    buf.put_u8(((ct >> 16) & 0xFF) as u8);
    buf.put_u8(((ct >> 8) & 0xFF) as u8);
    buf.put_u8((ct & 0xFF) as u8);

    buf.put_slice(data);
    buf.freeze()
}

/// Build an FLV audio tag body for AAC.
pub fn build_flv_audio_tag(data: &[u8], is_sequence_header: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + data.len());
    buf.put_u8(AAC_TAG_HEADER);
    buf.put_u8(if is_sequence_header { 0x00 } else { 0x01 });
    buf.put_slice(data);
    buf.freeze()
}

/// The video sequence header tag for a SPS/PPS pair.
pub fn video_sequence_header(sps: &[u8], pps: &[u8]) -> Option<Bytes> {
    build_avc_decoder_config(sps, pps).map(|config| build_flv_video_tag(&config, true, true, 0))
}

/// Package an Annex B access unit as a video tag.
///
/// Parameter sets are dropped (they travel in the sequence header). Returns
/// the tag and whether it holds an IDR slice, or `None` if no slice data
/// remains.
pub fn video_frame(annex_b: &[u8]) -> Option<(Bytes, bool)> {
    let nals = filter_parameter_sets(parse_annex_b(annex_b));
    if nals.is_empty() {
        return None;
    }
    let keyframe = contains_idr(&nals);
    let avcc = nals_to_avcc(&nals);
    Some((build_flv_video_tag(&avcc, keyframe, false, 0), keyframe))
}

/// Maps sink timestamps (nanoseconds) onto RTMP milliseconds.
///
/// The first timestamp seen becomes zero; earlier timestamps clamp to zero.
#[derive(Debug, Default)]
pub struct TimestampMapper {
    base_ns: Option<i64>,
}

impl TimestampMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_rtmp_ms(&mut self, timestamp_ns: i64) -> u32 {
        let base = *self.base_ns.get_or_insert(timestamp_ns);
        let elapsed_ms = timestamp_ns.saturating_sub(base).max(0) / 1_000_000;
        u32::try_from(elapsed_ms).unwrap_or(u32::MAX)
    }

    pub fn reset(&mut self) {
        self.base_ns = None;
    }
}
