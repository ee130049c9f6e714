//! The encoder per-packet bitstream metadata header (§6): precedes the
//! encoded bytes of every packet the accelerator produces.
//!
//! Firmware <= 6.1 writes the 32-byte `rev61` layout (no SSIM fields);
//! newer firmware writes up to 64 bytes including fixed-point SSIM. As with
//! the decoder trailer, the layout is fixed for a session at open time.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Which encoder metadata header layout firmware is writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncMetaLayout {
    /// Firmware <= 6.1: 32-byte header, no SSIM.
    Rev61,
    /// Firmware > 6.1: 64-byte header with SSIM.
    Current,
}

impl EncMetaLayout {
    /// Size in bytes of the header for this layout.
    #[must_use]
    pub fn header_size(self) -> usize {
        match self {
            Self::Rev61 => 32,
            Self::Current => 64,
        }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawEncMetaRev61 {
    frame_tstamp: [u8; 8],
    frame_type: [u8; 2],
    avg_frame_qp: [u8; 2],
    recycle_index: [u8; 4],
    av1_show_frame: u8,
    reserved: [u8; 9],
    metadata_size: [u8; 2],
    reserved2: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<RawEncMetaRev61>() == 32);

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawEncMetaCurrent {
    frame_tstamp: [u8; 8],
    frame_type: [u8; 2],
    avg_frame_qp: [u8; 2],
    recycle_index: [u8; 4],
    av1_show_frame: u8,
    reserved: [u8; 9],
    metadata_size: [u8; 2],
    ssim_y: [u8; 2],
    ssim_u: [u8; 2],
    ssim_v: [u8; 2],
    reserved2: [u8; 30],
}

const _: () = assert!(std::mem::size_of::<RawEncMetaCurrent>() == 64);

/// SSIM reported for each plane, as 1/10000ths (only present under
/// [`EncMetaLayout::Current`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ssim {
    /// Luma plane SSIM × 10000.
    pub y: u16,
    /// Chroma U plane SSIM × 10000.
    pub u: u16,
    /// Chroma V plane SSIM × 10000.
    pub v: u16,
}

/// Parsed per-packet encoder metadata header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncMeta {
    /// Which wire layout this was parsed from.
    pub layout: EncMetaLayout,
    /// Presentation timestamp the accelerator stamped this packet with.
    pub frame_tstamp: u64,
    /// Frame type (codec-specific encoding: I/P/B/IDR/...).
    pub frame_type: u16,
    /// Average quantization parameter for the frame.
    pub avg_frame_qp: u16,
    /// Index of the source frame buffer now free for reuse.
    pub recycle_index: u32,
    /// Whether an AV1 temporal unit should be shown (`show_existing_frame`
    /// semantics).
    pub av1_show_frame: bool,
    /// Reported size of this metadata header, as firmware understands it.
    pub metadata_size: u16,
    /// SSIM, when the firmware layout reports it.
    pub ssim: Option<Ssim>,
}

impl EncMeta {
    /// Parse an encoder metadata header out of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::BufferTooShort`] if `bytes` is shorter than
    /// the fixed header for `layout`.
    pub fn parse(bytes: &[u8], layout: EncMetaLayout) -> Result<Self> {
        let header_size = layout.header_size();
        if bytes.len() < header_size {
            return Err(ProtocolError::BufferTooShort { expected: header_size, actual: bytes.len() });
        }

        match layout {
            EncMetaLayout::Rev61 => {
                let raw = RawEncMetaRev61::ref_from_prefix(bytes)
                    .map_err(|_| ProtocolError::BufferTooShort { expected: header_size, actual: bytes.len() })?
                    .0;
                Ok(Self {
                    layout,
                    frame_tstamp: u64::from_be_bytes(raw.frame_tstamp),
                    frame_type: u16::from_be_bytes(raw.frame_type),
                    avg_frame_qp: u16::from_be_bytes(raw.avg_frame_qp),
                    recycle_index: u32::from_be_bytes(raw.recycle_index),
                    av1_show_frame: raw.av1_show_frame != 0,
                    metadata_size: u16::from_be_bytes(raw.metadata_size),
                    ssim: None,
                })
            }
            EncMetaLayout::Current => {
                let raw = RawEncMetaCurrent::ref_from_prefix(bytes)
                    .map_err(|_| ProtocolError::BufferTooShort { expected: header_size, actual: bytes.len() })?
                    .0;
                Ok(Self {
                    layout,
                    frame_tstamp: u64::from_be_bytes(raw.frame_tstamp),
                    frame_type: u16::from_be_bytes(raw.frame_type),
                    avg_frame_qp: u16::from_be_bytes(raw.avg_frame_qp),
                    recycle_index: u32::from_be_bytes(raw.recycle_index),
                    av1_show_frame: raw.av1_show_frame != 0,
                    metadata_size: u16::from_be_bytes(raw.metadata_size),
                    ssim: Some(Ssim {
                        y: u16::from_be_bytes(raw.ssim_y),
                        u: u16::from_be_bytes(raw.ssim_u),
                        v: u16::from_be_bytes(raw.ssim_v),
                    }),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rev61_without_ssim() {
        let mut buf = vec![0u8; 32];
        buf[0..8].copy_from_slice(&1000u64.to_be_bytes());
        buf[16] = 1; // av1_show_frame

        let meta = EncMeta::parse(&buf, EncMetaLayout::Rev61).unwrap();
        assert_eq!(meta.frame_tstamp, 1000);
        assert!(meta.av1_show_frame);
        assert_eq!(meta.ssim, None);
    }

    #[test]
    fn parses_current_with_ssim() {
        let mut buf = vec![0u8; 64];
        buf[18..20].copy_from_slice(&9950u16.to_be_bytes());
        let meta = EncMeta::parse(&buf, EncMetaLayout::Current).unwrap();
        assert_eq!(meta.ssim.unwrap().y, 9950);
    }

    #[test]
    fn rejects_short_header() {
        let buf = vec![0u8; 10];
        assert!(matches!(EncMeta::parse(&buf, EncMetaLayout::Current), Err(ProtocolError::BufferTooShort { .. })));
    }
}
