//! The block I/O primitive (C2): a page-aligned `pread`/`pwrite` surface
//! over the accelerator's synthetic LBA address space.
//!
//! Every request is a whole number of 4096-byte pages; the library never
//! scatter-gathers (§6). Implementations translate this into whatever a
//! real NVMe pass-through ioctl or a POSIX/Win32 file handle looks like on
//! the host platform — that translation lives outside this crate, which
//! only specifies the boundary.

use std::{future::Future, io, ops::Deref};

use xcoder_proto::lba::PAGE_SIZE;

/// A page-aligned, owned buffer.
///
/// All buffers handed to a [`BlockDevice`] must be page-aligned (§9); this
/// type is the single place that allocates and guarantees that alignment,
/// rather than sprinkling alignment arithmetic at every call site.
#[derive(Debug, Clone)]
pub struct AlignedBuffer {
    data: Vec<u8>,
}

impl AlignedBuffer {
    /// Allocate a zeroed buffer covering at least `len` bytes, rounded up to
    /// a whole number of 4096-byte pages.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        let page = PAGE_SIZE as usize;
        let pages = len.div_ceil(page);
        Self { data: vec![0u8; pages * page] }
    }

    /// Number of 4096-byte pages this buffer spans.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.data.len() / PAGE_SIZE as usize
    }

    /// Mutable access to the underlying bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

/// Page-aligned read/write access to the accelerator's synthetic LBA
/// address space.
///
/// A production implementation backs this with an NVMe pass-through
/// ioctl; tests back it with an in-memory double. The trait is the
/// specified boundary between the two (§9).
pub trait BlockDevice: Send + Sync {
    /// Read `buf.page_count()` pages starting at `lba` into `buf`.
    fn read_pages(&self, lba: u32, buf: &mut AlignedBuffer) -> impl Future<Output = io::Result<()>> + Send;

    /// Write `buf.page_count()` pages starting at `lba`.
    fn write_pages(&self, lba: u32, buf: &AlignedBuffer) -> impl Future<Output = io::Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_rounds_up_to_whole_pages() {
        let buf = AlignedBuffer::zeroed(1);
        assert_eq!(buf.page_count(), 1);
        assert_eq!(buf.len(), PAGE_SIZE as usize);

        let buf = AlignedBuffer::zeroed(PAGE_SIZE as usize + 1);
        assert_eq!(buf.page_count(), 2);
    }

    #[test]
    fn zeroed_buffer_is_zero_filled() {
        let buf = AlignedBuffer::zeroed(16);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
