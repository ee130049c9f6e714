//! Encoder-side SEI emission (C8, §4.7 emission paragraph): builds the NAL
//! unit bytes for a set of SEI messages and applies emulation-prevention
//! byte stuffing, the inverse of the host-side parsing that
//! `xcoder_proto::metadata` does on the decode path.
//!
//! This module owns byte-layout direction only; message *content*
//! (`sei_type`, payload bytes) is the caller's concern.

use thiserror::Error;

/// Start code prefixing every NAL unit this module emits.
const NAL_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// RBSP trailing bits byte appended after the last SEI message
/// (`rbsp_trailing_bits`: a single `1` bit followed by zero padding).
const RBSP_TRAILING_BYTE: u8 = 0x80;

/// Errors raised while building or parsing an SEI NAL unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeiError {
    /// The buffer was too short to contain a NAL start code and header.
    #[error("SEI NAL unit truncated: need at least {expected} bytes, have {actual}")]
    Truncated {
        /// Minimum bytes required.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },
    /// The buffer didn't start with a NAL start code.
    #[error("missing NAL start code")]
    MissingStartCode,
    /// The NAL unit type byte didn't identify an SEI NAL unit.
    #[error("unexpected NAL unit type {0:#x}, expected an SEI NAL unit")]
    NotSei(u8),
}

/// Which codec's NAL unit header conventions to use (§4.7: "NAL unit
/// headers specific to H.264 vs H.265").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalFlavor {
    /// H.264 Annex B: one-byte NAL header, `nal_unit_type == 6` for SEI.
    H264,
    /// H.265 Annex B: two-byte NAL header, `nal_unit_type == 39` (prefix
    /// SEI) shifted into the high six bits of the first byte.
    H265,
}

impl NalFlavor {
    const H264_SEI_NAL_TYPE: u8 = 6;
    const H265_SEI_NAL_TYPE: u8 = 39;

    fn header_len(self) -> usize {
        match self {
            NalFlavor::H264 => 1,
            NalFlavor::H265 => 2,
        }
    }

    fn header_bytes(self) -> Vec<u8> {
        match self {
            NalFlavor::H264 => vec![Self::H264_SEI_NAL_TYPE],
            NalFlavor::H265 => vec![(Self::H265_SEI_NAL_TYPE << 1) & 0x7E, 0x01],
        }
    }

    fn is_sei_header(self, bytes: &[u8]) -> bool {
        match self {
            NalFlavor::H264 => bytes.first() == Some(&Self::H264_SEI_NAL_TYPE),
            NalFlavor::H265 => bytes.first().is_some_and(|b| (b >> 1) & 0x3F == Self::H265_SEI_NAL_TYPE),
        }
    }
}

/// One SEI message to emit (payload is already in its final wire form —
/// `payload_type` and `payload_size` are emitted using the standard
/// "extend with repeated 0xFF bytes past 255" encoding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeiMessage {
    /// SEI payload type (matches `sei_type` on the decode side).
    pub payload_type: u32,
    /// Raw payload bytes, not yet emulation-prevented.
    pub payload: Vec<u8>,
}

fn encode_ff_extended(mut value: u32, out: &mut Vec<u8>) {
    while value >= 255 {
        out.push(0xFF);
        value -= 255;
    }
    out.push(value as u8);
}

/// Apply H.264/H.265 Annex B emulation prevention: insert `0x03` after
/// every `0x00 0x00` that would otherwise be followed by `0x00`, `0x01`,
/// `0x02`, or `0x03` (§8 property 6).
#[must_use]
pub fn ep_insert(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + rbsp.len() / 3 + 1);
    let mut zero_run = 0usize;
    for &byte in rbsp {
        if zero_run >= 2 && byte <= 0x03 {
            out.push(0x03);
            zero_run = 0;
        }
        out.push(byte);
        if byte == 0x00 {
            zero_run += 1;
        } else {
            zero_run = 0;
        }
    }
    out
}

/// Remove emulation-prevention bytes inserted by [`ep_insert`], recovering
/// the original RBSP payload.
#[must_use]
pub fn ep_remove(ep: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ep.len());
    let mut zero_run = 0usize;
    let mut i = 0;
    while i < ep.len() {
        let byte = ep[i];
        if zero_run >= 2 && byte == 0x03 && ep.get(i + 1).is_some_and(|next| *next <= 0x03) {
            zero_run = 0;
            i += 1;
            continue;
        }
        out.push(byte);
        if byte == 0x00 {
            zero_run += 1;
        } else {
            zero_run = 0;
        }
        i += 1;
    }
    out
}

/// Build a complete SEI NAL unit (start code, NAL header, emulation-
/// prevented SEI messages, RBSP trailing byte) for the given codec
/// flavor.
#[must_use]
pub fn build_sei_nal(flavor: NalFlavor, messages: &[SeiMessage]) -> Vec<u8> {
    let mut rbsp = Vec::new();
    for msg in messages {
        encode_ff_extended(msg.payload_type, &mut rbsp);
        encode_ff_extended(msg.payload.len() as u32, &mut rbsp);
        rbsp.extend_from_slice(&msg.payload);
    }
    rbsp.push(RBSP_TRAILING_BYTE);

    let mut nal = Vec::with_capacity(NAL_START_CODE.len() + flavor.header_len() + rbsp.len() * 2);
    nal.extend_from_slice(&NAL_START_CODE);
    nal.extend_from_slice(&flavor.header_bytes());
    nal.extend_from_slice(&ep_insert(&rbsp));
    nal
}

/// Strip a NAL unit built by [`build_sei_nal`] back down to its raw SEI
/// payload bytes (start code and header validated, trailing byte dropped,
/// emulation prevention removed). Inverse of `build_sei_nal`'s wrapping,
/// not a re-implementation of `xcoder_proto::metadata`'s table parsing.
pub fn strip_sei_nal(flavor: NalFlavor, nal: &[u8]) -> Result<Vec<u8>, SeiError> {
    let min_len = NAL_START_CODE.len() + flavor.header_len() + 1;
    if nal.len() < min_len {
        return Err(SeiError::Truncated { expected: min_len, actual: nal.len() });
    }
    if nal[..NAL_START_CODE.len()] != NAL_START_CODE {
        return Err(SeiError::MissingStartCode);
    }
    let header = &nal[NAL_START_CODE.len()..NAL_START_CODE.len() + flavor.header_len()];
    if !flavor.is_sei_header(header) {
        return Err(SeiError::NotSei(header[0]));
    }
    let body_start = NAL_START_CODE.len() + flavor.header_len();
    let rbsp = ep_remove(&nal[body_start..]);
    Ok(rbsp.strip_suffix(&[RBSP_TRAILING_BYTE]).map(<[u8]>::to_vec).unwrap_or(rbsp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ep_round_trips_arbitrary_bytes() {
        let original = vec![0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x02, 0xAB, 0x00, 0x00, 0x03];
        let inserted = ep_insert(&original);
        assert_eq!(ep_remove(&inserted), original);
    }

    #[test]
    fn ep_insert_contains_no_bare_emulation_sequence() {
        let original = vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x00, 0x00];
        let inserted = ep_insert(&original);
        for window in inserted.windows(3) {
            if window[0] == 0x00 && window[1] == 0x00 {
                assert!(window[2] > 0x03, "found un-prevented start-code-like sequence: {window:?}");
            }
        }
    }

    #[test]
    fn builds_and_strips_an_h264_sei_nal() {
        let messages = vec![SeiMessage { payload_type: 4, payload: vec![0x00, 0x00, 0x01, 0xAA] }];
        let nal = build_sei_nal(NalFlavor::H264, &messages);
        assert!(nal.starts_with(&NAL_START_CODE));

        let recovered = strip_sei_nal(NalFlavor::H264, &nal).unwrap();
        // type(1) + size(1) + payload(4)
        assert_eq!(recovered, vec![4, 4, 0x00, 0x00, 0x01, 0xAA]);
    }

    #[test]
    fn builds_and_strips_an_h265_sei_nal() {
        let messages = vec![SeiMessage { payload_type: 137, payload: vec![1, 2, 3] }];
        let nal = build_sei_nal(NalFlavor::H265, &messages);
        let recovered = strip_sei_nal(NalFlavor::H265, &nal).unwrap();
        // payload_type 137 extends past 255? no - 137 < 255 so single byte 137.
        assert_eq!(recovered[0], 137);
        assert_eq!(recovered[1], 3);
        assert_eq!(&recovered[2..], &[1, 2, 3]);
    }

    #[test]
    fn payload_size_extends_with_repeated_0xff_past_255() {
        let payload = vec![0xCC; 300];
        let messages = vec![SeiMessage { payload_type: 5, payload: payload.clone() }];
        let nal = build_sei_nal(NalFlavor::H264, &messages);
        let recovered = strip_sei_nal(NalFlavor::H264, &nal).unwrap();
        // type byte, then 0xFF, 0xFF, 45 (255+255+45=... wait 300 = 255+45)
        assert_eq!(recovered[0], 5);
        assert_eq!(recovered[1], 0xFF);
        assert_eq!(recovered[2], 300 - 255);
        assert_eq!(&recovered[3..], payload.as_slice());
    }

    #[test]
    fn rejects_wrong_flavor() {
        let messages = vec![SeiMessage { payload_type: 4, payload: vec![1] }];
        let nal = build_sei_nal(NalFlavor::H264, &messages);
        assert!(matches!(strip_sei_nal(NalFlavor::H265, &nal), Err(SeiError::NotSei(_))));
    }

    #[test]
    fn rejects_truncated_nal() {
        assert!(matches!(
            strip_sei_nal(NalFlavor::H264, &[0x00, 0x00]),
            Err(SeiError::Truncated { .. })
        ));
    }

    proptest::proptest! {
        #[test]
        fn ep_round_trip_is_total(bytes in proptest::collection::vec(0u8..=3, 0..64)) {
            let inserted = ep_insert(&bytes);
            proptest::prop_assert_eq!(ep_remove(&inserted), bytes);
        }
    }
}
