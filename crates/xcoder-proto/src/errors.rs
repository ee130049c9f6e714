//! Wire-level parsing errors.

use thiserror::Error;

/// Errors raised while decoding a fixed-layout wire struct.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer shorter than the struct it was supposed to hold.
    #[error("buffer too short: expected at least {expected} bytes, got {actual}")]
    BufferTooShort {
        /// Minimum required length.
        expected: usize,
        /// Actual buffer length.
        actual: usize,
    },

    /// PCI vendor/subsystem vendor ID did not match `NETINT_PCI_VENDOR_ID`.
    #[error("unexpected PCI vendor id: {0:#06x}")]
    UnexpectedVendorId(u16),

    /// LBA does not decode to any known operation.
    #[error("lba {0:#010x} does not map to a known operation")]
    UnknownLba(u32),

    /// SEI entry header claimed a payload longer than the remaining buffer.
    #[error("sei entry at offset {offset} claims size {size}, only {remaining} bytes remain")]
    SeiTruncated {
        /// Offset of the SEI entry header within the trailer.
        offset: usize,
        /// Declared payload size.
        size: usize,
        /// Bytes actually available after the header.
        remaining: usize,
    },
}

/// Convenience alias for proto-level results.
pub type Result<T> = std::result::Result<T, ProtocolError>;
