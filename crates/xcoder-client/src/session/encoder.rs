//! Encoder session (§4.5.2): `Opened → Configured → Streaming → Draining →
//! Closed`. The write path mirrors the decoder's but carries extra
//! per-frame control metadata; the read path pulls a fixed
//! [`EncMeta`] header ahead of each compressed packet.

use xcoder_core::{AlignedBuffer, BlockDevice, Context, StatusOracle, XcoderError};
use xcoder_proto::{encode, enc_meta::EncMetaLayout, lba::BufInfoKind, EncMeta, Operation};

use super::state::{InvalidStateError, SessionState};

/// How many 100 µs polls [`EncoderSession::read`] performs before giving up.
const READ_POLL_MAX_ITERATIONS: u32 = 1000;

/// Per-frame control metadata written alongside the frame payload
/// (§4.5.2: "force-key-frame flag, SEI override byte, long-term-reference
/// hints, force-QP, bitrate-reconfig blob, ROI map length").
#[derive(Debug, Clone, Default)]
pub struct EncodeControl {
    /// Force this frame to be coded as an IDR/key frame.
    pub force_key_frame: bool,
    /// Non-default SEI emission policy for this frame (codec-specific
    /// encoding; `0` means "use session default").
    pub sei_override: u8,
    /// Long-term-reference hint bitmask.
    pub long_term_reference_hints: u8,
    /// Forced QP for this frame, or `None` to leave rate control alone.
    pub force_qp: Option<u8>,
    /// Bitrate-reconfiguration request, applied before this frame encodes.
    pub bitrate_reconfig: Option<u32>,
    /// Region-of-interest map bytes, one priority byte per macroblock.
    pub roi_map: Vec<u8>,
}

const CONTROL_HEADER_LEN: usize = 16;

fn encode_control_header(control: &EncodeControl) -> [u8; CONTROL_HEADER_LEN] {
    let mut header = [0u8; CONTROL_HEADER_LEN];
    header[0] = u8::from(control.force_key_frame);
    header[1] = control.sei_override;
    header[2] = control.long_term_reference_hints;
    header[3] = control.force_qp.map_or(0, |_| 1);
    header[4] = control.force_qp.unwrap_or(0);
    header[5..9].copy_from_slice(&control.bitrate_reconfig.unwrap_or(0).to_le_bytes());
    header[9] = u8::from(control.bitrate_reconfig.is_some());
    header[10..14].copy_from_slice(&(control.roi_map.len() as u32).to_le_bytes());
    header
}

/// One encoded packet handed back to the caller.
#[derive(Debug, Clone)]
pub struct EncodedPacket {
    /// Compressed bytes, with the metadata header already stripped.
    pub data: Vec<u8>,
    /// Parsed per-packet metadata header.
    pub meta: EncMeta,
}

/// The encoder session state machine (§4.5.2).
pub struct EncoderSession {
    context: Context,
    state: SessionState,
    meta_layout: EncMetaLayout,
}

impl EncoderSession {
    /// Wrap a freshly opened context as an encoder session.
    #[must_use]
    pub fn new(context: Context, meta_layout: EncMetaLayout) -> Self {
        Self { context, state: SessionState::Opened, meta_layout }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Accept configuration parameters, transitioning `Opened → Configured`.
    /// Cross-field validation of the caller's [`xcoder_core::validate::EncoderParams`]
    /// happens before this call; here we just record the transition.
    pub fn configure(&mut self) -> Result<(), InvalidStateError> {
        self.state.expect(&[SessionState::Opened])?;
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Begin streaming, transitioning `Configured → Streaming`.
    pub fn start_streaming(&mut self) -> Result<(), InvalidStateError> {
        self.state.expect(&[SessionState::Configured])?;
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Write one input frame plus its per-frame control metadata
    /// (§4.5.2 write path).
    pub async fn write<D: BlockDevice>(&mut self, device: &D, frame: &[u8], control: &EncodeControl, is_eos: bool) -> Result<(), XcoderError> {
        self.state.expect(&[SessionState::Streaming])?;
        if self.context.is_invalid() {
            return Err(XcoderError::InvalidSession);
        }

        let header = encode_control_header(control);
        let total_len = CONTROL_HEADER_LEN + control.roi_map.len() + frame.len();
        let mut buf = AlignedBuffer::zeroed(total_len);
        {
            let bytes = buf.as_mut_slice();
            bytes[..CONTROL_HEADER_LEN].copy_from_slice(&header);
            bytes[CONTROL_HEADER_LEN..CONTROL_HEADER_LEN + control.roi_map.len()].copy_from_slice(&control.roi_map);
            bytes[CONTROL_HEADER_LEN + control.roi_map.len()..CONTROL_HEADER_LEN + control.roi_map.len() + frame.len()]
                .copy_from_slice(frame);
        }

        self.set_write_len(device, total_len as u32).await?;
        let lba = encode(Operation::WriteInstance, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;

        if is_eos {
            self.issue_control(device, Operation::SetEos).await?;
            self.context.with_flags_mut(|f| f.ready_to_close = true);
        }
        self.context.record_frame();
        Ok(())
    }

    /// Read one encoded packet (§4.5.2 read path).
    pub async fn read<D: BlockDevice>(&mut self, device: &D) -> Result<Option<EncodedPacket>, XcoderError> {
        self.state.expect(&[SessionState::Streaming, SessionState::Draining])?;
        if self.context.is_invalid() {
            return Err(XcoderError::InvalidSession);
        }

        let available = self.poll_read_available(device).await?;
        if available == 0 {
            return Ok(None);
        }

        let read_len = page_round(available as usize);
        let mut buf = AlignedBuffer::zeroed(read_len);
        let lba = encode(Operation::ReadInstance, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.read_pages(lba, &mut buf).await.map_err(XcoderError::from)?;

        let header_size = self.meta_layout.header_size();
        let bytes: &[u8] = &buf;
        let meta = EncMeta::parse(&bytes[..header_size], self.meta_layout)?;
        self.context.record_packet();

        Ok(Some(EncodedPacket { data: bytes[header_size..available as usize].to_vec(), meta }))
    }

    async fn query_buf_available<D: BlockDevice>(&self, device: &D, kind: BufInfoKind) -> Result<u32, XcoderError> {
        let lba = encode(Operation::QueryInstanceBufInfo(kind), self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        let mut buf = AlignedBuffer::zeroed(1);
        device.read_pages(lba, &mut buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await?;
        let bytes: &[u8] = &buf;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    async fn poll_read_available<D: BlockDevice>(&self, device: &D) -> Result<u32, XcoderError> {
        for _ in 0..READ_POLL_MAX_ITERATIONS {
            let available = self.query_buf_available(device, BufInfoKind::ReadAvailable).await?;
            if available > 0 || self.context.flags().ready_to_close {
                return Ok(available);
            }
        }
        Ok(0)
    }

    async fn set_write_len<D: BlockDevice>(&self, device: &D, len: u32) -> Result<(), XcoderError> {
        let mut buf = AlignedBuffer::zeroed(1);
        buf.as_mut_slice()[0..4].copy_from_slice(&len.to_le_bytes());
        let lba = encode(Operation::SetWriteLen, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await
    }

    async fn issue_control<D: BlockDevice>(&self, device: &D, op: Operation) -> Result<(), XcoderError> {
        let buf = AlignedBuffer::zeroed(1);
        let lba = encode(op, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await
    }

    async fn pair_with_status<D: BlockDevice>(&self, device: &D) -> Result<(), XcoderError> {
        let oracle = StatusOracle::new(device);
        oracle.query_and_record(&self.context).await?;
        Ok(())
    }

    /// Drain and close the session.
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
    use xcoder_core::DeviceType;
    use xcoder_proto::metadata::MetadataLayout;

    fn ctx() -> Context {
        Context::new(DeviceType::Encoder, 2, 0, false, MetadataLayout::Current48, 0x20, 200)
    }

    #[test]
    fn configure_requires_opened_state() {
        let mut session = EncoderSession::new(ctx(), EncMetaLayout::Current);
        session.configure().unwrap();
        assert_eq!(session.state(), SessionState::Configured);
        assert!(session.configure().is_err());
    }

    #[test]
    fn start_streaming_requires_configured_state() {
        let mut session = EncoderSession::new(ctx(), EncMetaLayout::Current);
        assert!(session.start_streaming().is_err());
        session.configure().unwrap();
        session.start_streaming().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn control_header_carries_force_qp_flag() {
        let control = EncodeControl { force_qp: Some(30), ..EncodeControl::default() };
        let header = encode_control_header(&control);
        assert_eq!(header[3], 1);
        assert_eq!(header[4], 30);
    }

    #[test]
    fn control_header_records_roi_map_length() {
        let control = EncodeControl { roi_map: vec![0u8; 42], ..EncodeControl::default() };
        let header = encode_control_header(&control);
        assert_eq!(u32::from_le_bytes([header[10], header[11], header[12], header[13]]), 42);
    }
}
