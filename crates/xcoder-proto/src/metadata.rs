//! The decoder per-frame metadata trailer (§6, §9) and the SEI entry table
//! that follows it.
//!
//! Firmware older than [`crate::identify::Identify::MIN_FW_FOR_SW_VERSION_ANNOUNCE`]
//! writes a 32-byte trailer with no SEI bookkeeping; current firmware writes
//! the full 48-byte trailer. The context records which size firmware
//! reported at open and must use it unconditionally for every frame after
//! that (§9, "firmware version gating") — callers pass that choice in here
//! rather than re-detecting it per frame.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Which trailer layout firmware is writing, fixed for the lifetime of a
/// session at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataLayout {
    /// Firmware < 6.1: 32-byte trailer, no SEI table.
    Legacy32,
    /// Firmware >= 6.1: 48-byte trailer followed by the SEI table.
    Current48,
}

impl MetadataLayout {
    /// Size in bytes of the fixed trailer for this layout.
    #[must_use]
    pub fn trailer_size(self) -> usize {
        match self {
            Self::Legacy32 => 32,
            Self::Current48 => 48,
        }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawTrailer48 {
    crop_left: [u8; 2],
    crop_top: [u8; 2],
    crop_right: [u8; 2],
    crop_bottom: [u8; 2],
    frame_width: [u8; 2],
    frame_height: [u8; 2],
    pict_type: u8,
    reserved0: u8,
    frame_offset: [u8; 4],
    sei_header_bitmap: [u8; 4],
    sei_count: [u8; 2],
    sei_bytes_count: [u8; 2],
    reserved1: [u8; 22],
}

const _: () = assert!(std::mem::size_of::<RawTrailer48>() == 48);

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawTrailer32 {
    crop_left: [u8; 2],
    crop_top: [u8; 2],
    crop_right: [u8; 2],
    crop_bottom: [u8; 2],
    frame_width: [u8; 2],
    frame_height: [u8; 2],
    pict_type: u8,
    reserved0: u8,
    frame_offset: [u8; 4],
    reserved1: [u8; 12],
}

const _: () = assert!(std::mem::size_of::<RawTrailer32>() == 32);

/// A picture's crop rectangle, in the coordinate space of the full-size
/// decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropRect {
    /// Left crop offset in pixels.
    pub left: u16,
    /// Top crop offset in pixels.
    pub top: u16,
    /// Right crop offset in pixels.
    pub right: u16,
    /// Bottom crop offset in pixels.
    pub bottom: u16,
}

/// One SEI entry, located inside the decoder output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeiEntry {
    /// SEI payload type as carried on the wire (4, 5, 137, 144, ...).
    pub sei_type: u8,
    /// Offset of the payload bytes, relative to the start of the SEI table
    /// (immediately after the fixed trailer).
    pub payload_offset: usize,
    /// Length of the payload in bytes.
    pub payload_len: usize,
    /// Accelerator-reported status for this entry.
    pub status: u8,
}

/// Parsed per-frame metadata trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTrailer {
    /// Which wire layout this was parsed from.
    pub layout: MetadataLayout,
    /// Crop rectangle.
    pub crop: CropRect,
    /// Full (uncropped) decoded frame width.
    pub frame_width: u16,
    /// Full (uncropped) decoded frame height.
    pub frame_height: u16,
    /// Picture type reported by the accelerator (codec-specific encoding).
    pub pict_type: u8,
    /// Cumulative byte offset of the packet this frame was decoded from,
    /// used to recover PTS via the bitstream ring.
    pub frame_offset: u32,
    /// Entries parsed from the SEI table, empty under
    /// [`MetadataLayout::Legacy32`].
    pub sei_entries: Vec<SeiEntry>,
}

/// Size in bytes of the fixed 4-byte SEI entry header
/// `(type, size, status, reserved)`.
const SEI_ENTRY_HEADER_SIZE: usize = 4;

impl MetadataTrailer {
    /// Parse a decoder metadata trailer (and, for the current layout, the
    /// SEI table that follows it) out of `bytes`.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::BufferTooShort`] if `bytes` is shorter than the
    ///   fixed trailer for `layout`.
    /// - [`ProtocolError::SeiTruncated`] if an SEI entry's declared size
    ///   runs past the end of `bytes`.
    pub fn parse(bytes: &[u8], layout: MetadataLayout) -> Result<Self> {
        let trailer_size = layout.trailer_size();
        if bytes.len() < trailer_size {
            return Err(ProtocolError::BufferTooShort { expected: trailer_size, actual: bytes.len() });
        }

        match layout {
            MetadataLayout::Current48 => {
                let raw = RawTrailer48::ref_from_prefix(bytes)
                    .map_err(|_| ProtocolError::BufferTooShort { expected: trailer_size, actual: bytes.len() })?
                    .0;
                let sei_count = u16::from_be_bytes(raw.sei_count) as usize;
                let sei_table = &bytes[trailer_size..];
                let sei_entries = parse_sei_table(sei_table, sei_count)?;

                Ok(Self {
                    layout,
                    crop: CropRect {
                        left: u16::from_be_bytes(raw.crop_left),
                        top: u16::from_be_bytes(raw.crop_top),
                        right: u16::from_be_bytes(raw.crop_right),
                        bottom: u16::from_be_bytes(raw.crop_bottom),
                    },
                    frame_width: u16::from_be_bytes(raw.frame_width),
                    frame_height: u16::from_be_bytes(raw.frame_height),
                    pict_type: raw.pict_type,
                    frame_offset: u32::from_be_bytes(raw.frame_offset),
                    sei_entries,
                })
            }
            MetadataLayout::Legacy32 => {
                let raw = RawTrailer32::ref_from_prefix(bytes)
                    .map_err(|_| ProtocolError::BufferTooShort { expected: trailer_size, actual: bytes.len() })?
                    .0;
                Ok(Self {
                    layout,
                    crop: CropRect {
                        left: u16::from_be_bytes(raw.crop_left),
                        top: u16::from_be_bytes(raw.crop_top),
                        right: u16::from_be_bytes(raw.crop_right),
                        bottom: u16::from_be_bytes(raw.crop_bottom),
                    },
                    frame_width: u16::from_be_bytes(raw.frame_width),
                    frame_height: u16::from_be_bytes(raw.frame_height),
                    pict_type: raw.pict_type,
                    frame_offset: u32::from_be_bytes(raw.frame_offset),
                    sei_entries: Vec::new(),
                })
            }
        }
    }

    /// Find the first SEI entry recognized as HDR10+ dynamic metadata
    /// (T.35 registered, prefix `00 3C 00 01 04 00`).
    #[must_use]
    pub fn hdr10_plus(&self, sei_table: &[u8]) -> Option<SeiEntry> {
        self.sei_entries.iter().copied().find(|e| {
            e.sei_type == 4 && sei_table.get(e.payload_offset..e.payload_offset + 6) == Some(&HDR10_PLUS_PREFIX)
        })
    }

    /// Find the first SEI entry recognized as a CEA-608 caption block
    /// (T.35 registered, prefix `B5 00 31 47 41 39 34`), returning the
    /// offset/length of the caption payload only (the 9-byte ATSC header
    /// is skipped).
    #[must_use]
    pub fn cea_608(&self, sei_table: &[u8]) -> Option<SeiEntry> {
        self.sei_entries.iter().find_map(|e| {
            if e.sei_type != 4 {
                return None;
            }
            let payload = sei_table.get(e.payload_offset..e.payload_offset + e.payload_len)?;
            if payload.get(..7) != Some(&CEA_608_PREFIX) {
                return None;
            }
            let count_byte = *payload.get(8)?;
            let cc_len = (count_byte & 0x1F) as usize * 3;
            Some(SeiEntry {
                sei_type: e.sei_type,
                payload_offset: e.payload_offset + 9,
                payload_len: cc_len,
                status: e.status,
            })
        })
    }
}

const HDR10_PLUS_PREFIX: [u8; 6] = [0x00, 0x3C, 0x00, 0x01, 0x04, 0x00];
const CEA_608_PREFIX: [u8; 7] = [0xB5, 0x00, 0x31, 0x47, 0x41, 0x39, 0x34];

/// Recognized SEI payload type codes (§4.7).
pub mod sei_type {
    /// T.35 registered user data (HDR10+, CEA-608/708).
    pub const T35_REGISTERED: u8 = 4;
    /// Unregistered user data.
    pub const USER_DATA_UNREGISTERED: u8 = 5;
    /// Mastering display colour volume.
    pub const MASTERING_DISPLAY: u8 = 137;
    /// Content light level information.
    pub const CONTENT_LIGHT_LEVEL: u8 = 144;
}

fn parse_sei_table(table: &[u8], count: usize) -> Result<Vec<SeiEntry>> {
    let mut entries = Vec::with_capacity(count);
    let mut offset = 0usize;

    for _ in 0..count {
        if table.len() < offset + SEI_ENTRY_HEADER_SIZE {
            return Err(ProtocolError::SeiTruncated {
                offset,
                size: 0,
                remaining: table.len().saturating_sub(offset),
            });
        }
        let header = &table[offset..offset + SEI_ENTRY_HEADER_SIZE];
        let sei_type = header[0];
        let size = header[1] as usize;
        let status = header[2];
        let payload_offset = offset + SEI_ENTRY_HEADER_SIZE;

        if table.len() < payload_offset + size {
            return Err(ProtocolError::SeiTruncated {
                offset,
                size,
                remaining: table.len().saturating_sub(payload_offset),
            });
        }

        entries.push(SeiEntry { sei_type, payload_offset, payload_len: size, status });
        offset = payload_offset + size;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trailer48_bytes(sei_count: u16, sei_table: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 48];
        buf[22..24].copy_from_slice(&sei_count.to_be_bytes());
        buf.extend_from_slice(sei_table);
        buf
    }

    #[test]
    fn parses_legacy32_with_no_sei() {
        let mut buf = vec![0u8; 32];
        buf[8..10].copy_from_slice(&1920u16.to_be_bytes());
        buf[10..12].copy_from_slice(&1080u16.to_be_bytes());
        let trailer = MetadataTrailer::parse(&buf, MetadataLayout::Legacy32).unwrap();
        assert_eq!(trailer.frame_width, 1920);
        assert_eq!(trailer.frame_height, 1080);
        assert!(trailer.sei_entries.is_empty());
    }

    #[test]
    fn parses_current48_sei_table() {
        let mut sei_table = Vec::new();
        sei_table.extend_from_slice(&[sei_type::MASTERING_DISPLAY, 3, 0, 0]);
        sei_table.extend_from_slice(&[1, 2, 3]);
        let buf = trailer48_bytes(1, &sei_table);

        let trailer = MetadataTrailer::parse(&buf, MetadataLayout::Current48).unwrap();
        assert_eq!(trailer.sei_entries.len(), 1);
        assert_eq!(trailer.sei_entries[0].sei_type, sei_type::MASTERING_DISPLAY);
        assert_eq!(trailer.sei_entries[0].payload_len, 3);
    }

    #[test]
    fn cea_608_scenario_from_end_to_end_test() {
        // S4: header bytes B5 00 31 47 41 39 34 03 02 C0 then 6 CC bytes.
        let mut sei_table = Vec::new();
        let mut payload = vec![0xB5, 0x00, 0x31, 0x47, 0x41, 0x39, 0x34, 0x03, 0x02, 0xC0];
        payload.extend_from_slice(&[0xAA; 6]);
        sei_table.extend_from_slice(&[sei_type::T35_REGISTERED, payload.len() as u8, 0, 0]);
        sei_table.extend_from_slice(&payload);
        let buf = trailer48_bytes(1, &sei_table);

        let trailer = MetadataTrailer::parse(&buf, MetadataLayout::Current48).unwrap();
        let cc = trailer.cea_608(&sei_table).unwrap();
        assert_eq!(cc.payload_len, 6);
        assert_eq!(cc.payload_offset, 4 + 9);
    }

    #[test]
    fn truncated_sei_entry_is_rejected() {
        let mut sei_table = Vec::new();
        sei_table.extend_from_slice(&[sei_type::USER_DATA_UNREGISTERED, 10, 0, 0]);
        sei_table.extend_from_slice(&[1, 2, 3]); // declares 10, only 3 remain
        let buf = trailer48_bytes(1, &sei_table);

        assert!(matches!(
            MetadataTrailer::parse(&buf, MetadataLayout::Current48),
            Err(ProtocolError::SeiTruncated { .. })
        ));
    }
}
