//! Decoder session (§4.5.1): `Opened → Configured → Streaming → Draining →
//! Flushed → Closed`.

use xcoder_codec::{BitstreamRing, DtsFifo};
use xcoder_core::{AlignedBuffer, BlockDevice, Context, StatusOracle, XcoderError};
use xcoder_proto::{
    encode,
    lba::BufInfoKind,
    metadata::{MetadataLayout, MetadataTrailer},
    Operation, StreamInfo, STREAM_INFO_SIZE,
};

use super::state::{InvalidStateError, SessionState};

impl From<InvalidStateError> for XcoderError {
    fn from(err: InvalidStateError) -> Self {
        XcoderError::InvalidParam(err.to_string())
    }
}

/// How many times [`DecoderSession::write`] retries growing the write
/// buffer before giving up (§4.5.1 step 1).
const WRITE_BUFFER_GROW_RETRY_BUDGET: u32 = 3;

/// How many 100 µs polls [`DecoderSession::read`] performs outside
/// low-delay mode before giving up (§4.5.1 step 1).
const READ_POLL_MAX_ITERATIONS: u32 = 1000;

/// A decoded frame handed back to the caller.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Raw decoded picture bytes (page-rounded).
    pub data: Vec<u8>,
    /// Recovered presentation timestamp.
    pub pts: i64,
    /// Decode timestamp as supplied by the caller at write time.
    pub dts: i64,
    /// Flags recorded alongside this frame's packet in the bitstream ring,
    /// or 0 on a ring miss (§4.5.1 step 8-9).
    pub flags: u32,
    /// Parsed per-frame trailer metadata.
    pub trailer: MetadataTrailer,
    /// Set once the device has confirmed flush via `query-eos` (§7).
    pub end_of_stream: bool,
}

/// The decoder session state machine (§4.5.1).
pub struct DecoderSession {
    context: Context,
    state: SessionState,
    ring: BitstreamRing,
    dts_fifo: DtsFifo,
    historical_max_pkt_size: u32,
    low_delay: bool,
    pic_reorder_delay: usize,
    last_pts: Option<i64>,
    last_dts: Option<i64>,
    last_dts_interval: i64,
    discovered_geometry: Option<StreamInfo>,
}

impl DecoderSession {
    /// Wrap a freshly opened context as a decoder session.
    #[must_use]
    pub fn new(context: Context, pic_reorder_delay: usize) -> Self {
        Self {
            context,
            state: SessionState::Opened,
            ring: BitstreamRing::new(),
            dts_fifo: DtsFifo::new(pic_reorder_delay, 4096),
            historical_max_pkt_size: 0,
            low_delay: false,
            pic_reorder_delay,
            last_pts: None,
            last_dts: None,
            last_dts_interval: 0,
            discovered_geometry: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Geometry learned from `query-stream-info` on the first readable
    /// frame (§4.5.1 step 4), or `None` before the first frame has been
    /// read.
    #[must_use]
    pub fn discovered_geometry(&self) -> Option<&StreamInfo> {
        self.discovered_geometry.as_ref()
    }

    /// Accept configuration parameters, transitioning `Opened → Configured`.
    ///
    /// Parameter validation itself lives in `xcoder_core::validate`; this
    /// just records the decoder-relevant flags the caller already decided.
    pub fn configure(&mut self, low_delay: bool) -> Result<(), InvalidStateError> {
        self.state.expect(&[SessionState::Opened])?;
        self.low_delay = low_delay;
        self.context.with_flags_mut(|f| f.low_delay = low_delay);
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Begin streaming, transitioning `Configured → Streaming`.
    pub fn start_streaming(&mut self) -> Result<(), InvalidStateError> {
        self.state.expect(&[SessionState::Configured])?;
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Write one input packet (§4.5.1 write path).
    pub async fn write<D: BlockDevice>(
        &mut self,
        device: &D,
        packet: &[u8],
        pts: i64,
        dts: i64,
        flags: u32,
        is_sos: bool,
        is_eos: bool,
        custom_sei: Option<Vec<u8>>,
    ) -> Result<(), XcoderError> {
        self.state.expect(&[SessionState::Streaming])?;
        if self.context.is_invalid() {
            return Err(XcoderError::InvalidSession);
        }

        let mut available = self.query_buf_available(device, BufInfoKind::WriteAvailable).await?;
        for _ in 0..WRITE_BUFFER_GROW_RETRY_BUDGET {
            if available as usize >= packet.len() {
                break;
            }
            self.set_decoder_max_pkt_size(device, packet.len() as u32).await?;
            available = self.query_buf_available(device, BufInfoKind::WriteAvailable).await?;
        }
        if available as usize < packet.len() {
            return Err(XcoderError::WriteBufferFull);
        }
        self.historical_max_pkt_size = self.historical_max_pkt_size.max(packet.len() as u32);

        self.set_write_len(device, packet.len() as u32).await?;
        if is_sos {
            self.issue_control(device, Operation::SetSos).await?;
        }

        let page_rounded = page_round(packet.len());
        let mut buf = AlignedBuffer::zeroed(page_rounded);
        buf.as_mut_slice()[..packet.len()].copy_from_slice(packet);
        let lba = encode(Operation::WriteInstance, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;

        self.ring.insert(pts, flags, packet.len() as u32, custom_sei);

        if is_eos {
            self.issue_control(device, Operation::SetEos).await?;
            self.context.with_flags_mut(|f| f.ready_to_close = true);
        }

        if !self.dts_fifo.push(dts) {
            tracing::warn!(session_id = self.context.wire_session_id(), "DTS FIFO at capacity, dropping oldest");
        }
        self.context.record_packet();
        Ok(())
    }

    /// Read one decoded frame (§4.5.1 read path). Returns `Ok(None)` for a
    /// sequence-change signal (metadata-only read, length zero to the
    /// caller).
    pub async fn read<D: BlockDevice>(&mut self, device: &D, metadata_header_size: usize) -> Result<Option<DecodedFrame>, XcoderError> {
        self.state.expect(&[SessionState::Streaming, SessionState::Draining])?;
        if self.context.is_invalid() {
            return Err(XcoderError::InvalidSession);
        }

        let kind = if self.low_delay { BufInfoKind::ReadAvailableBusy } else { BufInfoKind::ReadAvailable };
        let available = self.poll_read_available(device, kind).await?;

        if available as usize == metadata_header_size {
            return Ok(None);
        }

        let ready_to_close = self.context.flags().ready_to_close;
        if available == 0 && ready_to_close {
            self.issue_control(device, Operation::QueryEos).await?;
            self.state = SessionState::Flushed;
            return Ok(Some(DecodedFrame {
                data: Vec::new(),
                pts: self.last_pts.unwrap_or(0),
                dts: self.last_dts.unwrap_or(0),
                flags: 0,
                trailer: MetadataTrailer { layout: self.context.meta_layout(), crop: Default::default(), frame_width: 0, frame_height: 0, pict_type: 0, frame_offset: 0, sei_entries: Vec::new() },
                end_of_stream: true,
            }));
        }

        if self.context.flags().is_first_frame {
            self.discover_stream_info(device).await?;
            self.context.with_flags_mut(|f| f.is_first_frame = false);
        }

        if !ready_to_close && self.dts_fifo.len() < self.pic_reorder_delay + 1 {
            return Err(XcoderError::NotEnoughLookahead);
        }

        let read_len = page_round(available as usize);
        let mut buf = AlignedBuffer::zeroed(read_len);
        let lba = encode(Operation::ReadInstance, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.read_pages(lba, &mut buf).await.map_err(XcoderError::from)?;

        let trailer_size = self.context.meta_layout().trailer_size();
        let bytes: &[u8] = &buf;
        let trailer = MetadataTrailer::parse(&bytes[bytes.len() - trailer_size..], self.context.meta_layout())?;

        let dts = self.pop_dts();
        let (pts, flags) = self.recover_pts(trailer.frame_offset, dts);

        self.last_pts = Some(pts);
        self.context.record_frame();

        Ok(Some(DecodedFrame {
            data: bytes[..bytes.len() - trailer_size].to_vec(),
            pts,
            dts,
            flags,
            trailer,
            end_of_stream: false,
        }))
    }

    fn pop_dts(&mut self) -> i64 {
        let threshold = self.pic_reorder_delay;
        let remaining = if self.context.flags().ready_to_close { Some(0) } else { None };
        match self.dts_fifo.get_with_threshold(threshold, remaining) {
            Some(dts) => {
                if let Some(last) = self.last_dts {
                    self.last_dts_interval = dts - last;
                }
                self.last_dts = Some(dts);
                dts
            },
            None => {
                self.pic_reorder_delay += 1;
                let padded = self.last_dts.map_or(0, |d| d + self.last_dts_interval);
                self.last_dts = Some(padded);
                padded
            },
        }
    }

    /// Recover PTS by binary-searching the bitstream ring (§4.5.1 step 8-9).
    fn recover_pts(&mut self, frame_offset: u32, dts: i64) -> (i64, u32) {
        if let Some(hit) = self.ring.find_by_frame_offset(frame_offset) {
            (hit.pts, hit.flags)
        } else {
            tracing::warn!(frame_offset, "bitstream ring miss; falling back to DTS-relative PTS");
            let pts = match (self.last_pts, self.last_dts) {
                (Some(last_pts), Some(last_dts)) => last_pts + (dts - last_dts),
                _ => dts,
            };
            (pts, 0)
        }
    }

    /// Issue `query-stream-info` to learn the active geometry and record it,
    /// so the frame-buffer pool can be sized before the first frame is read
    /// (§4.5.1 step 4).
    async fn discover_stream_info<D: BlockDevice>(&mut self, device: &D) -> Result<(), XcoderError> {
        let lba = encode(Operation::QueryStreamInfo, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        let mut buf = AlignedBuffer::zeroed(1);
        device.read_pages(lba, &mut buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await?;
        let bytes: &[u8] = &buf;
        self.discovered_geometry = Some(StreamInfo::parse(&bytes[..STREAM_INFO_SIZE])?);
        Ok(())
    }

    async fn query_buf_available<D: BlockDevice>(&self, device: &D, kind: BufInfoKind) -> Result<u32, XcoderError> {
        let lba = encode(Operation::QueryInstanceBufInfo(kind), self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        let mut buf = AlignedBuffer::zeroed(1);
        device.read_pages(lba, &mut buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await?;
        let bytes: &[u8] = &buf;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    async fn poll_read_available<D: BlockDevice>(&self, device: &D, kind: BufInfoKind) -> Result<u32, XcoderError> {
        if matches!(kind, BufInfoKind::ReadAvailableBusy) {
            return self.query_buf_available(device, kind).await;
        }
        for _ in 0..READ_POLL_MAX_ITERATIONS {
            let available = self.query_buf_available(device, kind).await?;
            if available > 0 || self.context.flags().ready_to_close {
                return Ok(available);
            }
        }
        Ok(0)
    }

    async fn set_decoder_max_pkt_size<D: BlockDevice>(&self, device: &D, max_pkt_size: u32) -> Result<(), XcoderError> {
        let mut buf = AlignedBuffer::zeroed(1);
        buf.as_mut_slice()[0..4].copy_from_slice(&max_pkt_size.to_le_bytes());
        let lba = encode(Operation::SetDecoderParams, self.context.wire_session_id(), self.context.instance_type(), self.context.hw_channel());
        device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;
        self.pair_with_status(device).await
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

    /// Every write LBA pairs with a status-query read (§3 invariant).
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

    fn ctx() -> Context {
        Context::new(DeviceType::Decoder, 1, 0, false, MetadataLayout::Current48, 0x10, 100)
    }

    #[test]
    fn configure_requires_opened_state() {
        let mut session = DecoderSession::new(ctx(), 2);
        assert_eq!(session.state(), SessionState::Opened);
        session.configure(true).unwrap();
        assert_eq!(session.state(), SessionState::Configured);
        assert!(session.configure(true).is_err());
    }

    #[test]
    fn start_streaming_requires_configured_state() {
        let mut session = DecoderSession::new(ctx(), 2);
        assert!(session.start_streaming().is_err());
        session.configure(false).unwrap();
        session.start_streaming().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn page_round_rounds_up() {
        assert_eq!(page_round(0), 1);
        assert_eq!(page_round(1), 1);
        assert_eq!(page_round(4096), 1);
        assert_eq!(page_round(4097), 2);
    }
}
