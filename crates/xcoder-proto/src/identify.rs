//! The identify payload (§6): accelerator -> host, 4096 bytes.
//!
//! All multi-byte integers arrive in accelerator byte order (big-endian) and
//! must be byte-swapped on read — every field is stored as a raw big-endian
//! byte array with host-order accessors layered on top, rather than relying
//! on the host's native endianness matching the wire.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// PCI vendor id every NetInt-class accelerator reports, for both VID and
/// SSVID fields.
pub const NETINT_PCI_VENDOR_ID: u16 = 0x1D82;

/// Size of the identify payload in bytes.
pub const IDENTIFY_PAYLOAD_SIZE: usize = 4096;

/// Per-engine usage counters reported by identify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineCounters {
    /// H.264 decode sessions served since boot.
    pub h264_decode: u32,
    /// H.265 decode sessions served since boot.
    pub h265_decode: u32,
    /// H.264 encode sessions served since boot.
    pub h264_encode: u32,
    /// H.265 encode sessions served since boot.
    pub h265_encode: u32,
}

/// DDR rank configuration reported by identify, which determines the valid
/// P2P frame-index range (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdrConfig {
    /// Single-rank DDR.
    SingleRank,
    /// Dual-rank DDR (wider P2P frame-index range).
    DualRank,
}

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawIdentify {
    pci_vendor_id: [u8; 2],
    pci_subsystem_vendor_id: [u8; 2],
    model_number: [u8; 4],
    firmware_rev: [u8; 4],
    h264_decode_count: [u8; 4],
    h265_decode_count: [u8; 4],
    h264_encode_count: [u8; 4],
    h265_encode_count: [u8; 4],
    ddr_config: u8,
    firmware_branch: [u8; 32],
    commit_hash: [u8; 40],
    commit_time: [u8; 4],
    build_time: [u8; 4],
    build_id: [u8; 64],
    xcoder_num_elements: [u8; 4],
}

/// Parsed identify payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identify {
    /// PCI vendor id, expected to equal [`NETINT_PCI_VENDOR_ID`].
    pub pci_vendor_id: u16,
    /// PCI subsystem vendor id, also expected to equal
    /// [`NETINT_PCI_VENDOR_ID`].
    pub pci_subsystem_vendor_id: u16,
    /// Accelerator model number.
    pub model_number: u32,
    /// Firmware revision, encoded as `major << 24 | minor << 16 | patch <<
    /// 8 | build`.
    pub firmware_rev: u32,
    /// Per-engine session counters.
    pub engine_counters: EngineCounters,
    /// DDR rank configuration.
    pub ddr_config: DdrConfig,
    /// Firmware branch name (NUL-trimmed ASCII).
    pub firmware_branch: String,
    /// Firmware build commit hash (NUL-trimmed ASCII).
    pub commit_hash: String,
    /// Unix timestamp of the firmware commit.
    pub commit_time: u32,
    /// Unix timestamp of the firmware build.
    pub build_time: u32,
    /// Free-form build identifier (NUL-trimmed ASCII).
    pub build_id: String,
    /// Number of second-generation descriptor elements. Zero selects the
    /// legacy descriptor layout.
    pub xcoder_num_elements: u32,
}

impl Identify {
    /// Firmware revision required for SW-version-announce (§6) and
    /// the 48-byte decoder metadata layout (§9, "firmware version gating").
    pub const MIN_FW_FOR_SW_VERSION_ANNOUNCE: u32 = 0x0601_0000;

    /// Parse the 4096-byte identify payload.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::BufferTooShort`] if fewer than
    ///   [`IDENTIFY_PAYLOAD_SIZE`] bytes are provided.
    /// - [`ProtocolError::UnexpectedVendorId`] if either vendor id field does
    ///   not equal [`NETINT_PCI_VENDOR_ID`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < IDENTIFY_PAYLOAD_SIZE {
            return Err(ProtocolError::BufferTooShort {
                expected: IDENTIFY_PAYLOAD_SIZE,
                actual: bytes.len(),
            });
        }

        let raw = RawIdentify::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::BufferTooShort {
                expected: IDENTIFY_PAYLOAD_SIZE,
                actual: bytes.len(),
            })?
            .0;

        let pci_vendor_id = u16::from_be_bytes(raw.pci_vendor_id);
        let pci_subsystem_vendor_id = u16::from_be_bytes(raw.pci_subsystem_vendor_id);

        if pci_vendor_id != NETINT_PCI_VENDOR_ID {
            return Err(ProtocolError::UnexpectedVendorId(pci_vendor_id));
        }
        if pci_subsystem_vendor_id != NETINT_PCI_VENDOR_ID {
            return Err(ProtocolError::UnexpectedVendorId(pci_subsystem_vendor_id));
        }

        Ok(Self {
            pci_vendor_id,
            pci_subsystem_vendor_id,
            model_number: u32::from_be_bytes(raw.model_number),
            firmware_rev: u32::from_be_bytes(raw.firmware_rev),
            engine_counters: EngineCounters {
                h264_decode: u32::from_be_bytes(raw.h264_decode_count),
                h265_decode: u32::from_be_bytes(raw.h265_decode_count),
                h264_encode: u32::from_be_bytes(raw.h264_encode_count),
                h265_encode: u32::from_be_bytes(raw.h265_encode_count),
            },
            ddr_config: if raw.ddr_config == 0 { DdrConfig::SingleRank } else { DdrConfig::DualRank },
            firmware_branch: trim_nul(&raw.firmware_branch),
            commit_hash: trim_nul(&raw.commit_hash),
            commit_time: u32::from_be_bytes(raw.commit_time),
            build_time: u32::from_be_bytes(raw.build_time),
            build_id: trim_nul(&raw.build_id),
            xcoder_num_elements: u32::from_be_bytes(raw.xcoder_num_elements),
        })
    }

    /// Whether firmware is new enough to require the SW-version-announce
    /// handshake and use the 48-byte metadata trailer layout.
    #[must_use]
    pub fn supports_sw_version_announce(&self) -> bool {
        self.firmware_rev >= Self::MIN_FW_FOR_SW_VERSION_ANNOUNCE
    }

    /// Whether this accelerator uses the second-generation per-frame
    /// descriptor layout.
    #[must_use]
    pub fn uses_second_generation_descriptors(&self) -> bool {
        self.xcoder_num_elements > 0
    }
}

fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_payload() -> Vec<u8> {
        let mut buf = vec![0u8; IDENTIFY_PAYLOAD_SIZE];
        buf[0..2].copy_from_slice(&NETINT_PCI_VENDOR_ID.to_be_bytes());
        buf[2..4].copy_from_slice(&NETINT_PCI_VENDOR_ID.to_be_bytes());
        buf[4..8].copy_from_slice(&7u32.to_be_bytes()); // model_number
        buf[8..12].copy_from_slice(&Identify::MIN_FW_FOR_SW_VERSION_ANNOUNCE.to_be_bytes());
        buf
    }

    #[test]
    fn parses_valid_payload() {
        let id = Identify::parse(&valid_payload()).unwrap();
        assert_eq!(id.model_number, 7);
        assert!(id.supports_sw_version_announce());
        assert!(!id.uses_second_generation_descriptors());
    }

    #[test]
    fn rejects_wrong_vendor_id() {
        let mut buf = valid_payload();
        buf[0..2].copy_from_slice(&0xBEEFu16.to_be_bytes());
        assert!(matches!(Identify::parse(&buf), Err(ProtocolError::UnexpectedVendorId(0xBEEF))));
    }

    #[test]
    fn rejects_short_buffer() {
        let buf = vec![0u8; 10];
        assert!(matches!(Identify::parse(&buf), Err(ProtocolError::BufferTooShort { .. })));
    }

    #[test]
    fn byte_swap_is_invertible() {
        // Property 8: ntoh(hton(x)) == x for the fixed-size integer fields.
        let value: u32 = 0xDEAD_BEEF;
        let be = value.to_be_bytes();
        assert_eq!(u32::from_be_bytes(be), value);
    }
}
