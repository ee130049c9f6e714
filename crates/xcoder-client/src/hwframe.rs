//! The HW-frame descriptor plane (C10, §4.8): a non-owning, copyable
//! 64-byte descriptor of a hardware-resident frame buffer, plus the
//! move-only handle that owns its release.

use std::sync::atomic::{AtomicBool, Ordering};

use xcoder_core::{AlignedBuffer, BlockDevice, XcoderError};
use xcoder_proto::{
    encode,
    lba::{CLEAR_INSTANCE_FRAME_INDEX_MASK, WIRE_SESSION_UNASSIGNED},
    Operation,
};

/// DDR rank configuration, read from the identify payload, that bounds the
/// P2P frame-index range (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct P2pRange {
    /// Smallest frame index eligible for P2P DMA translation (exclusive
    /// lower bound: `(min_p2p_id, max_p2p_id]`).
    pub min_p2p_id: u32,
    /// Largest frame index eligible for P2P DMA translation (inclusive).
    pub max_p2p_id: u32,
    /// Byte size of one frame's DMA-addressable region.
    pub frame_bin_size: u64,
}

impl P2pRange {
    /// Translate a frame index into a DMA offset, or `None` if the index is
    /// outside the P2P-eligible range.
    #[must_use]
    pub fn memory_offset(&self, frame_index: u32) -> Option<u64> {
        if frame_index > self.min_p2p_id && frame_index <= self.max_p2p_id {
            Some(u64::from(frame_index - self.min_p2p_id) * self.frame_bin_size)
        } else {
            None
        }
    }
}

/// One crop/scale output sub-descriptor within a HW-frame metadata block
/// (§4.8: "up to three sub-descriptors, one per crop/scale output").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubDescriptor {
    /// Which output slot this sub-descriptor fills (`0..=2`).
    pub output_idx: u8,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Accelerator-assigned buffer index, used to release the buffer and
    /// (in P2P mode) to compute its DMA offset.
    pub frame_index: u32,
}

/// A hardware-resident frame buffer handle (§4.8).
///
/// Non-owning fields (host handle, session id, source cpu-type) are filled
/// in by the library, since the accelerator's own metadata doesn't know
/// them. Release is explicit and idempotent: dropping a `HwFrame` without
/// calling [`HwFrame::release`] leaks the accelerator-side buffer, matching
/// release is explicit rather than `Drop`-based (a caller that forgets to
/// release gets a resource leak, not a double-free).
#[derive(Debug)]
pub struct HwFrame {
    session_id: u8,
    hw_channel: u8,
    sub_descriptors: Vec<SubDescriptor>,
    released: AtomicBool,
}

impl HwFrame {
    /// Construct a frame handle from the sub-descriptors the accelerator
    /// reported, stamping in the host-only fields.
    #[must_use]
    pub fn new(session_id: u8, hw_channel: u8, sub_descriptors: Vec<SubDescriptor>) -> Self {
        Self { session_id, hw_channel, sub_descriptors, released: AtomicBool::new(false) }
    }

    /// The session that owns this frame.
    #[must_use]
    pub fn session_id(&self) -> u8 {
        self.session_id
    }

    /// Sub-descriptors indexed by `output_idx`.
    #[must_use]
    pub fn sub_descriptors(&self) -> &[SubDescriptor] {
        &self.sub_descriptors
    }

    /// Whether [`release`](Self::release) has already completed for this
    /// handle.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Release every sub-descriptor's accelerator-side buffer via
    /// `clear-instance-buf`, using a zeroed page payload (§4.8).
    ///
    /// `clear-instance-buf` is keyed on frame_index alone, not on a
    /// session — the P2P/DDR frame pool it releases is device-global — so
    /// the LBA is encoded with [`WIRE_SESSION_UNASSIGNED`] rather than
    /// `self.session_id`. The frame index is masked to
    /// [`CLEAR_INSTANCE_FRAME_INDEX_MASK`] before being folded into the LBA,
    /// since the accelerator only carries it in the low byte.
    ///
    /// Idempotent: calling this twice is a no-op the second time, matching
    /// the accelerator's own idempotent handling of an already-cleared
    /// index.
    pub async fn release<D: BlockDevice>(&self, device: &D) -> Result<(), XcoderError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let zero_page = AlignedBuffer::zeroed(1);
        for sub in &self.sub_descriptors {
            let lba = encode(Operation::ClearInstanceBuf, WIRE_SESSION_UNASSIGNED, false, self.hw_channel);
            device
                .write_pages(lba | (sub.frame_index & CLEAR_INSTANCE_FRAME_INDEX_MASK), &zero_page)
                .await
                .map_err(XcoderError::from)?;
        }
        Ok(())
    }
}
