//! The stream-info payload (§4.5.1 step 4): accelerator -> host, issued on
//! the decoder's first readable frame to learn the active geometry before
//! any frame-buffer pool is sized.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Size in bytes of the stream-info payload.
pub const STREAM_INFO_SIZE: usize = 24;

/// Pixel format reported by stream-info, the closed set the accelerator's
/// decode engines support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit 4:2:0 planar (NV12-equivalent).
    Yuv420P8,
    /// 10-bit 4:2:0 planar, two bytes per sample.
    Yuv420P10,
    /// An accelerator-reported code outside the known taxonomy.
    Unknown(u8),
}

impl PixelFormat {
    fn from_wire(code: u8) -> Self {
        match code {
            0 => Self::Yuv420P8,
            1 => Self::Yuv420P10,
            other => Self::Unknown(other),
        }
    }

    /// Bytes per sample this format needs (§4.5.1: "bit-depth factor"),
    /// used to size the frame-buffer pool.
    #[must_use]
    pub fn bit_depth_factor(self) -> u32 {
        match self {
            Self::Yuv420P8 => 1,
            Self::Yuv420P10 => 2,
            Self::Unknown(_) => 1,
        }
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawStreamInfo {
    width: [u8; 4],
    height: [u8; 4],
    stride: [u8; 4],
    pixel_format: u8,
    reserved: [u8; 3],
    min_frame_buffer_count: [u8; 4],
    max_pkt_size: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<RawStreamInfo>() == STREAM_INFO_SIZE);

/// Parsed stream geometry, the basis for first-frame frame-buffer pool
/// sizing (§4.5.1 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Active picture width in pixels.
    pub width: u32,
    /// Active picture height in pixels.
    pub height: u32,
    /// Transfer stride in bytes, which may exceed `width` due to alignment.
    pub stride: u32,
    /// Active pixel format.
    pub pixel_format: PixelFormat,
    /// Minimum frame-buffer count the accelerator wants the host pool
    /// sized to.
    pub min_frame_buffer_count: u32,
    /// Largest packet size the accelerator expects to write per frame.
    pub max_pkt_size: u32,
}

impl StreamInfo {
    /// Parse a stream-info payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::BufferTooShort`] if fewer than
    /// [`STREAM_INFO_SIZE`] bytes are provided.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < STREAM_INFO_SIZE {
            return Err(ProtocolError::BufferTooShort { expected: STREAM_INFO_SIZE, actual: bytes.len() });
        }
        let raw = RawStreamInfo::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::BufferTooShort { expected: STREAM_INFO_SIZE, actual: bytes.len() })?
            .0;

        Ok(Self {
            width: u32::from_be_bytes(raw.width),
            height: u32::from_be_bytes(raw.height),
            stride: u32::from_be_bytes(raw.stride),
            pixel_format: PixelFormat::from_wire(raw.pixel_format),
            min_frame_buffer_count: u32::from_be_bytes(raw.min_frame_buffer_count),
            max_pkt_size: u32::from_be_bytes(raw.max_pkt_size),
        })
    }

    /// Bytes one frame-buffer pool entry needs to hold this geometry
    /// (§4.5.1: "allocate the decoder frame-buffer pool sized to the first
    /// discovered geometry").
    #[must_use]
    pub fn frame_buffer_size(&self) -> u64 {
        u64::from(self.stride) * u64::from(self.height) * u64::from(self.pixel_format.bit_depth_factor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_with(width: u32, height: u32, stride: u32, pixel_format: u8) -> Vec<u8> {
        let mut buf = vec![0u8; STREAM_INFO_SIZE];
        buf[0..4].copy_from_slice(&width.to_be_bytes());
        buf[4..8].copy_from_slice(&height.to_be_bytes());
        buf[8..12].copy_from_slice(&stride.to_be_bytes());
        buf[12] = pixel_format;
        buf
    }

    #[test]
    fn parses_geometry() {
        let info = StreamInfo::parse(&bytes_with(1920, 1080, 1920, 0)).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert_eq!(info.pixel_format, PixelFormat::Yuv420P8);
    }

    #[test]
    fn ten_bit_doubles_the_frame_buffer_size() {
        let eight_bit = StreamInfo::parse(&bytes_with(1920, 1080, 1920, 0)).unwrap();
        let ten_bit = StreamInfo::parse(&bytes_with(1920, 1080, 1920, 1)).unwrap();
        assert_eq!(ten_bit.frame_buffer_size(), eight_bit.frame_buffer_size() * 2);
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(matches!(StreamInfo::parse(&[0u8; 4]), Err(ProtocolError::BufferTooShort { .. })));
    }
}
