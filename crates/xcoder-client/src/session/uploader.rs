//! Uploader session (§4.5.4): an encoder session opened with the upload
//! sub-flag, feeding host-resident YUV frames into a pre-allocated ring of
//! HW-frame slots. On P2P-capable hosts, frame indices additionally
//! translate to DMA offsets via the Netint P2P kernel driver (§6).

use std::path::Path;

use xcoder_core::{AlignedBuffer, BlockDevice, Context, StatusOracle, XcoderError};
use xcoder_proto::{encode, lba::BufInfoKind, Operation};

use super::state::{InvalidStateError, SessionState};
use crate::hwframe::{HwFrame, P2pRange, SubDescriptor};

/// Which pool kind `set-uploader-params` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// Host-resident buffers, copied in and out over the read/write
    /// windows like any other instance data.
    Normal,
    /// Device-resident buffers addressable by P2P DMA.
    P2p,
}

/// PCI routing triple identifying a host's P2P-capable device, read from
/// sysfs (§4.5.4: "reads the host PCI domain/bus/device/function from
/// sysfs").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciAddress {
    /// PCI domain.
    pub domain: u16,
    /// PCI bus number.
    pub bus: u8,
    /// PCI device number.
    pub device: u8,
    /// PCI function number.
    pub function: u8,
}

impl PciAddress {
    /// Parse a sysfs-style `DDDD:BB:DD.F` address string (§4.5.4).
    ///
    /// # Errors
    ///
    /// Returns [`XcoderError::InvalidParam`] if `text` does not match the
    /// four-field format.
    pub fn parse(text: &str) -> Result<Self, XcoderError> {
        let bad = || XcoderError::InvalidParam(format!("malformed PCI address: {text}"));
        let (domain_bus_dev, function) = text.split_once('.').ok_or_else(bad)?;
        let mut parts = domain_bus_dev.split(':');
        let domain = u16::from_str_radix(parts.next().ok_or_else(bad)?, 16).map_err(|_| bad())?;
        let bus = u8::from_str_radix(parts.next().ok_or_else(bad)?, 16).map_err(|_| bad())?;
        let device = u8::from_str_radix(parts.next().ok_or_else(bad)?, 16).map_err(|_| bad())?;
        if parts.next().is_some() {
            return Err(bad());
        }
        let function = u8::from_str_radix(function, 16).map_err(|_| bad())?;
        Ok(Self { domain, bus, device, function })
    }

    /// Read the PCI address of the device backing `sysfs_device_path` by
    /// resolving its `device` symlink (§4.5.4). Returns `None` if the host
    /// has no P2P kernel driver exposing this path — a normal, expected
    /// condition on non-P2P hosts, not an error.
    #[must_use]
    pub fn from_sysfs(sysfs_device_path: &Path) -> Option<Self> {
        let target = std::fs::read_link(sysfs_device_path).ok()?;
        let name = target.file_name()?.to_str()?;
        Self::parse(name).ok()
    }
}

/// The uploader session state machine (§4.5.4).
pub struct UploaderSession {
    context: Context,
    state: SessionState,
    pool_kind: PoolKind,
    p2p_range: Option<P2pRange>,
}

impl UploaderSession {
    /// Wrap a freshly opened context (opened with the upload sub-flag) as
    /// an uploader session.
    #[must_use]
    pub fn new(context: Context, pool_kind: PoolKind) -> Self {
        Self { context, state: SessionState::Opened, pool_kind, p2p_range: None }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Which pool kind this session was opened with.
    #[must_use]
    pub fn pool_kind(&self) -> PoolKind {
        self.pool_kind
    }

    /// Attach the DDR-derived P2P frame-index range, once read from the
    /// identify payload (§4.8). Only meaningful for [`PoolKind::P2p`].
    pub fn set_p2p_range(&mut self, range: P2pRange) {
        self.p2p_range = Some(range);
    }

    /// Translate a frame index to a DMA offset, when this session has a
    /// P2P range attached.
    #[must_use]
    pub fn p2p_memory_offset(&self, frame_index: u32) -> Option<u64> {
        self.p2p_range.and_then(|range| range.memory_offset(frame_index))
    }

    /// Push `set-uploader-params(pool_size, pool_kind)`, transitioning
    /// `Opened → Configured`.
    pub async fn configure<D: BlockDevice>(&mut self, device: &D, pool_size: u32) -> Result<(), XcoderError> {
        self.state.expect(&[SessionState::Opened])?;
        let mut buf = AlignedBuffer::zeroed(1);
        buf.as_mut_slice()[0..4].copy_from_slice(&pool_size.to_le_bytes());
        buf.as_mut_slice()[4] = match self.pool_kind {
            PoolKind::Normal => 0,
            PoolKind::P2p => 1,
        };
        let lba = encode(Operation::SetWriteConfig, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await?;
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Begin streaming, transitioning `Configured → Streaming`.
    pub fn start_streaming(&mut self) -> Result<(), InvalidStateError> {
        self.state.expect(&[SessionState::Configured])?;
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Upload one host-resident YUV frame into a free pool slot
    /// (§4.5.4 write path).
    pub async fn write<D: BlockDevice>(&mut self, device: &D, frame: &[u8]) -> Result<HwFrame, XcoderError> {
        self.state.expect(&[SessionState::Streaming])?;
        if self.context.is_invalid() {
            return Err(XcoderError::InvalidSession);
        }

        self.wait_for_free_slot(device).await?;

        let page_rounded = page_round(frame.len());
        let mut buf = AlignedBuffer::zeroed(page_rounded);
        buf.as_mut_slice()[..frame.len()].copy_from_slice(frame);
        let write_lba = encode(Operation::WriteInstance, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.write_pages(write_lba, &buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await?;

        let mut result = AlignedBuffer::zeroed(1);
        let read_lba = encode(Operation::ReadInstance, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.read_pages(read_lba, &mut result).await.map_err(XcoderError::from)?;
        let bytes: &[u8] = &result;
        let frame_index = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

        self.context.record_frame();
        Ok(HwFrame::new(
            self.context.wire_session_id(),
            self.context.hw_channel(),
            vec![SubDescriptor { output_idx: 0, width: 0, height: 0, frame_index }],
        ))
    }

    async fn wait_for_free_slot<D: BlockDevice>(&self, device: &D) -> Result<(), XcoderError> {
        let lba = encode(
            Operation::QueryInstanceBufInfo(BufInfoKind::UploadAvailable),
            self.context.wire_session_id(),
            self.context.instance_type(),
            self.context.hw_channel(),
        );
        let mut buf = AlignedBuffer::zeroed(1);
        device.read_pages(lba, &mut buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await?;
        let bytes: &[u8] = &buf;
        let available = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if available == 0 {
            return Err(XcoderError::WriteBufferFull);
        }
        Ok(())
    }

    async fn pair_with_status<D: BlockDevice>(&self, device: &D) -> Result<(), XcoderError> {
        let oracle = StatusOracle::new(device);
        oracle.query_and_record(&self.context).await?;
        Ok(())
    }

    /// Close the session (no distinct draining phase for the uploader).
    pub async fn close<D: BlockDevice>(&mut self, device: &D) -> Result<(), XcoderError> {
        let lba = encode(Operation::CloseSession, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        let buf = AlignedBuffer::zeroed(1);
        device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;
        self.context.close();
        self.state = SessionState::Closed;
        Ok(())
    }
}

fn page_round(len: usize) -> usize {
    len.div_ceil(xcoder_proto::lba::PAGE_SIZE as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pci_address_parses_sysfs_format() {
        let addr = PciAddress::parse("0000:3b:00.0").unwrap();
        assert_eq!(addr.domain, 0);
        assert_eq!(addr.bus, 0x3b);
        assert_eq!(addr.device, 0);
        assert_eq!(addr.function, 0);
    }

    #[test]
    fn pci_address_rejects_malformed_text() {
        assert!(PciAddress::parse("not-a-pci-address").is_err());
    }

    #[test]
    fn p2p_memory_offset_is_none_without_a_range() {
        use xcoder_core::DeviceType;
        use xcoder_proto::metadata::MetadataLayout;

        let ctx = Context::new(DeviceType::Uploader, 4, 0, false, MetadataLayout::Current48, 0x40, 400);
        let session = UploaderSession::new(ctx, PoolKind::Normal);
        assert_eq!(session.p2p_memory_offset(5), None);
    }
}
