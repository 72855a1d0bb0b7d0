//! H.264 Annex B bitstream helpers.
//!
//! Encoders emit Annex B: NAL units separated by `00 00 01` or
//! `00 00 00 01` start codes. Header ranges (`csd-0`, `csd-1`) carry a
//! single NAL unit each, without start code.

use bytes::Bytes;
use tracing::trace;

/// NAL unit types relevant for H.264.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NalUnitType {
    /// Non-IDR slice (P/B frame).
    NonIdrSlice = 1,
    /// IDR slice (keyframe).
    IdrSlice = 5,
    /// Supplemental Enhancement Information.
    Sei = 6,
    /// Sequence Parameter Set.
    Sps = 7,
    /// Picture Parameter Set.
    Pps = 8,
    /// Access Unit Delimiter.
    Aud = 9,
    /// Other/unknown NAL type.
    Other = 0,
}

impl From<u8> for NalUnitType {
    fn from(header: u8) -> Self {
        match header & 0x1F {
            1 => NalUnitType::NonIdrSlice,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::Aud,
            _ => NalUnitType::Other,
        }
    }
}

/// A single NAL unit, header byte included, start code excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    pub nal_type: NalUnitType,
    pub data: Bytes,
}

impl NalUnit {
    pub fn is_parameter_set(&self) -> bool {
        matches!(self.nal_type, NalUnitType::Sps | NalUnitType::Pps)
    }
}

/// Find the next start code at or after `from`; returns (position, length).
fn next_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Split an Annex B stream into NAL units.
///
/// Bytes before the first start code are ignored. Empty units are skipped.
pub fn parse_annex_b(data: &[u8]) -> Vec<NalUnit> {
    let mut nals = Vec::new();
    let mut cursor = next_start_code(data, 0);

    while let Some((position, length)) = cursor {
        let start = position + length;
        cursor = next_start_code(data, start);
        let end = cursor.map_or(data.len(), |(next, _)| next);

        if start < end {
            let unit = &data[start..end];
            nals.push(NalUnit {
                nal_type: NalUnitType::from(unit[0]),
                data: Bytes::copy_from_slice(unit),
            });
        }
    }

    trace!(count = nals.len(), "Parsed Annex B stream");
    nals
}

/// The last SPS and PPS found in an Annex B header stream.
pub fn split_parameter_sets(annex_b: &[u8]) -> Option<(Bytes, Bytes)> {
    let mut sps = None;
    let mut pps = None;

    for nal in parse_annex_b(annex_b) {
        match nal.nal_type {
            NalUnitType::Sps => sps = Some(nal.data),
            NalUnitType::Pps => pps = Some(nal.data),
            _ => {}
        }
    }

    sps.zip(pps)
}

/// True if any unit is an IDR slice.
pub fn contains_idr(nals: &[NalUnit]) -> bool {
    nals.iter().any(|nal| nal.nal_type == NalUnitType::IdrSlice)
}

/// Drop parameter sets and access unit delimiters, which travel in the
/// sequence header instead.
pub fn filter_parameter_sets(nals: Vec<NalUnit>) -> Vec<NalUnit> {
    nals.into_iter()
        .filter(|nal| !nal.is_parameter_set() && nal.nal_type != NalUnitType::Aud)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_annex_b_3byte_start_code() {
        let data = [0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E];
        let nals = parse_annex_b(&data);
        assert_eq!(nals.len(), 1);
        assert_eq!(nals[0].nal_type, NalUnitType::Sps);
        assert_eq!(nals[0].data.as_ref(), &[0x67, 0x42, 0x00, 0x1E]);
    }

    #[test]
    fn test_parse_annex_b_mixed_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, // SPS
            0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80, // PPS
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, // IDR
        ];
        let nals = parse_annex_b(&data);
        let types: Vec<NalUnitType> = nals.iter().map(|n| n.nal_type).collect();
        assert_eq!(
            types,
            vec![NalUnitType::Sps, NalUnitType::Pps, NalUnitType::IdrSlice]
        );
        assert_eq!(nals[1].data.as_ref(), &[0x68, 0xCE, 0x3C, 0x80]);
        assert!(contains_idr(&nals));
    }

    #[test]
    fn test_parse_ignores_leading_garbage_and_empty_units() {
        let data = [0xFF, 0x00, 0x00, 0x01, 0x00, 0x00, 0x01, 0x41, 0x9A];
        let nals = parse_annex_b(&data);
        assert_eq!(nals.len(), 1);
        assert_eq!(nals[0].nal_type, NalUnitType::NonIdrSlice);
        assert!(!contains_idr(&nals));
    }

    #[test]
    fn test_split_parameter_sets() {
        let headers = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x28, //
            0x00, 0x00, 0x00, 0x01, 0x68, 0xEE, 0x3C, 0xB0, //
            0x00, 0x00, 0x01, 0x06, 0x05, 0xFF, // SEI
        ];
        let (sps, pps) = split_parameter_sets(&headers).unwrap();
        assert_eq!(sps.as_ref(), &[0x67, 0x64, 0x00, 0x28]);
        assert_eq!(pps.as_ref(), &[0x68, 0xEE, 0x3C, 0xB0]);

        assert!(split_parameter_sets(&headers[..8]).is_none());
    }

    #[test]
    fn test_filter_parameter_sets() {
        let nals = vec![
            NalUnit {
                nal_type: NalUnitType::Aud,
                data: Bytes::from_static(&[0x09, 0xF0]),
            },
            NalUnit {
                nal_type: NalUnitType::Sps,
                data: Bytes::from_static(&[0x67]),
            },
            NalUnit {
                nal_type: NalUnitType::IdrSlice,
                data: Bytes::from_static(&[0x65]),
            },
        ];

        let filtered = filter_parameter_sets(nals);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].nal_type, NalUnitType::IdrSlice);
    }
}
