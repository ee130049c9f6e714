//! `MockDevice`: an in-memory [`BlockDevice`] double.
//!
//! Real firmware turns every LBA into a side effect; this double does the
//! same, but keeps its state in a `Mutex` instead of silicon. Session
//! lifecycle, keep-alive, and the status-oracle payload are modeled
//! generically, since every scenario in this workspace exercises them the
//! same way (§8, property 1). Instance data (`read-instance`) is
//! deliberately *not* modeled generically — each scenario crafts the exact
//! bytes it expects back via [`MockDevice::queue_instance_read`], the same
//! way `StatusOracle`'s own unit tests script a fixed response rather than
//! emulating the whole device.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io;
use std::sync::Mutex;

use xcoder_core::device::{AlignedBuffer, BlockDevice};
use xcoder_proto::lba::{self, BufInfoKind, Operation, WIRE_SESSION_UNASSIGNED};
use xcoder_proto::stats::LastError;

/// Byte size of the `query-session-stats` payload this double writes back.
const SESSION_STATS_SIZE: usize = xcoder_proto::stats::SESSION_STATS_SIZE;

/// A scripted sequence of values, the last one sticking once the queue is
/// drained — models a device whose state stabilizes rather than resetting
/// to zero the moment a test stops pushing expectations.
#[derive(Debug, Default)]
struct Sticky<T> {
    queue: VecDeque<T>,
    last: T,
}

impl<T: Clone + Default> Sticky<T> {
    fn push(&mut self, value: T) {
        self.queue.push_back(value);
    }

    fn next(&mut self) -> T {
        match self.queue.pop_front() {
            Some(value) => {
                self.last = value.clone();
                value
            },
            None => self.last.clone(),
        }
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[derive(Debug)]
struct MockSession {
    session_id: u16,
    session_timestamp: u64,
    err_count: u32,
    last_tx_id: u32,
    last_rc: u32,
    last_err_tx_id: u32,
    last_err: LastError,
    buf_info: HashMap<BufInfoKind, Sticky<u32>>,
    instance_reads: VecDeque<Vec<u8>>,
    instance_writes: Vec<Vec<u8>>,
    control_writes: Vec<(Operation, Vec<u8>)>,
    cleared_frames: HashMap<u32, u32>,
    free_frame_indices: Vec<u32>,
    next_frame_index: u32,
    stream_info_payload: Option<Vec<u8>>,
}

impl MockSession {
    fn new(session_id: u16, session_timestamp: u64) -> Self {
        Self {
            session_id,
            session_timestamp,
            err_count: 0,
            last_tx_id: 0,
            last_rc: 0,
            last_err_tx_id: 0,
            last_err: LastError::Success,
            buf_info: HashMap::new(),
            instance_reads: VecDeque::new(),
            instance_writes: Vec::new(),
            control_writes: Vec::new(),
            cleared_frames: HashMap::new(),
            free_frame_indices: Vec::new(),
            next_frame_index: 0,
            stream_info_payload: None,
        }
    }

    fn allocate_frame_index(&mut self) -> u32 {
        match self.free_frame_indices.pop() {
            Some(index) => index,
            None => {
                let index = self.next_frame_index;
                self.next_frame_index += 1;
                index
            },
        }
    }

    fn stats_bytes(&self) -> [u8; SESSION_STATS_SIZE] {
        let mut bytes = [0u8; SESSION_STATS_SIZE];
        bytes[0..2].copy_from_slice(&self.session_id.to_be_bytes());
        bytes[4..8].copy_from_slice(&self.err_count.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.last_tx_id.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.last_rc.to_be_bytes());
        bytes[16..20].copy_from_slice(&self.last_err_tx_id.to_be_bytes());
        bytes[20..22].copy_from_slice(&last_err_wire(self.last_err).to_be_bytes());
        bytes[24..32].copy_from_slice(&self.session_timestamp.to_be_bytes());
        bytes
    }
}

fn last_err_wire(err: LastError) -> u16 {
    match err {
        LastError::Success => 0,
        LastError::InvalidParam => 1,
        LastError::InvalidSession => 2,
        LastError::MemAlloc => 3,
        LastError::NvmeCmdFailed => 4,
        LastError::ErrorUnsupportedFwVersion => 5,
        LastError::VpuRecovery => 6,
        LastError::WriteBufferFull => 7,
        LastError::Unknown(code) => code,
    }
}

#[derive(Debug, Default)]
struct MockState {
    sessions: HashMap<u8, MockSession>,
    open_replies: HashMap<u8, VecDeque<(u16, u64)>>,
    next_auto_session_id: u16,
    next_auto_timestamp: u64,
    identify_payload: Option<Vec<u8>>,
}

impl MockState {
    fn session_mut(&mut self, wire_session_id: u8) -> &mut MockSession {
        self.sessions.entry(wire_session_id).or_insert_with(|| MockSession::new(0, 0))
    }
}

/// An in-memory accelerator double implementing [`BlockDevice`] (§2, `C2`).
///
/// Every public method beyond [`BlockDevice::read_pages`]/
/// [`BlockDevice::write_pages`] is test-only scaffolding: scripting a
/// response ahead of time, or inspecting what the driver wrote after the
/// fact.
#[derive(Debug, Default)]
pub struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    /// Construct a device with no sessions open and every scripted queue
    /// empty.
    #[must_use]
    pub fn new() -> Self {
        Self { state: Mutex::new(MockState { next_auto_session_id: 1, next_auto_timestamp: 1, ..MockState::default() }) }
    }

    /// Script the `(session_id, session_timestamp)` pair the next
    /// `open-session` for `wire_session_id` should return. Unscripted opens
    /// auto-assign sequential ids starting at 1 (§8 scenario S1 scripts
    /// this explicitly; most other scenarios don't care and take the
    /// default).
    #[allow(clippy::expect_used)]
    pub fn queue_open_reply(&self, wire_session_id: u8, session_id: u16, session_timestamp: u64) {
        let mut state = self.state.lock().expect("mock device mutex poisoned");
        state.open_replies.entry(wire_session_id).or_default().push_back((session_id, session_timestamp));
    }

    /// Script the next value a `query-instance-buf-info(kind)` read for
    /// `wire_session_id` should return. The last value pushed sticks once
    /// the queue drains (§8 scenario S2: "replies with 262144 bytes
    /// available after one retry" — push `0` once, then `262144`).
    #[allow(clippy::expect_used)]
    pub fn queue_buf_info(&self, wire_session_id: u8, kind: BufInfoKind, value: u32) {
        let mut state = self.state.lock().expect("mock device mutex poisoned");
        state.session_mut(wire_session_id).buf_info.entry(kind).or_default().push(value);
    }

    /// Script the exact bytes the next `read-instance` for
    /// `wire_session_id` should return. Each call to [`BlockDevice::read_pages`]
    /// targeting `read-instance` pops one entry; once drained, `read-instance`
    /// falls back to an auto-allocated 4-byte little-endian frame index
    /// (the shape `scaler`/`uploader`/`ai` frame allocation expects).
    #[allow(clippy::expect_used)]
    pub fn queue_instance_read(&self, wire_session_id: u8, bytes: Vec<u8>) {
        let mut state = self.state.lock().expect("mock device mutex poisoned");
        state.session_mut(wire_session_id).instance_reads.push_back(bytes);
    }

    /// Force every subsequent `query-session-stats` for `wire_session_id`
    /// to report `last_err = vpu_recovery` (§8 scenario S5), until
    /// [`Self::clear_faults`] is called.
    #[allow(clippy::expect_used)]
    pub fn inject_vpu_recovery(&self, wire_session_id: u8) {
        let mut state = self.state.lock().expect("mock device mutex poisoned");
        state.session_mut(wire_session_id).last_err = LastError::VpuRecovery;
    }

    /// Diverge `wire_session_id`'s reported session timestamp from whatever
    /// the caller's [`xcoder_core::Context`] already holds, so the next
    /// paired status query is classified `InvalidSession`.
    #[allow(clippy::expect_used)]
    pub fn diverge_session_timestamp(&self, wire_session_id: u8) {
        let mut state = self.state.lock().expect("mock device mutex poisoned");
        let session = state.session_mut(wire_session_id);
        session.session_timestamp = session.session_timestamp.wrapping_add(1);
    }

    /// Clear any injected fault for `wire_session_id`, restoring
    /// `last_err = success`.
    #[allow(clippy::expect_used)]
    pub fn clear_faults(&self, wire_session_id: u8) {
        let mut state = self.state.lock().expect("mock device mutex poisoned");
        state.session_mut(wire_session_id).last_err = LastError::Success;
    }

    /// Script the bytes a device-global `identify-device` read should
    /// return.
    #[allow(clippy::expect_used)]
    pub fn set_identify_payload(&self, bytes: Vec<u8>) {
        self.state.lock().expect("mock device mutex poisoned").identify_payload = Some(bytes);
    }

    /// Script the bytes `wire_session_id`'s `query-stream-info` read should
    /// return. Unscripted sessions report an all-zero payload, distinct from
    /// `read-instance`'s queue so a decoder's first-frame geometry query
    /// never consumes a frame a test queued for `read-instance`.
    #[allow(clippy::expect_used)]
    pub fn set_stream_info(&self, wire_session_id: u8, bytes: Vec<u8>) {
        self.state.lock().expect("mock device mutex poisoned").session_mut(wire_session_id).stream_info_payload = Some(bytes);
    }

    /// Every `write-instance` payload observed for `wire_session_id`, in
    /// issue order, for test assertions.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn instance_writes(&self, wire_session_id: u8) -> Vec<Vec<u8>> {
        let mut state = self.state.lock().expect("mock device mutex poisoned");
        state.session_mut(wire_session_id).instance_writes.clone()
    }

    /// How many times `clear-instance-buf(frame_index)` has been observed
    /// for `wire_session_id` (§8 scenario S6: "both calls return success").
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn clear_count(&self, wire_session_id: u8, frame_index: u32) -> u32 {
        let mut state = self.state.lock().expect("mock device mutex poisoned");
        *state.session_mut(wire_session_id).cleared_frames.entry(frame_index).or_insert(0)
    }

    /// How many control writes of `operation` have been observed for
    /// `wire_session_id` — used to confirm the keep-alive task is actually
    /// ticking, not just sleeping.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn control_write_count(&self, wire_session_id: u8, operation: Operation) -> usize {
        let mut state = self.state.lock().expect("mock device mutex poisoned");
        state.session_mut(wire_session_id).control_writes.iter().filter(|(op, _)| *op == operation).count()
    }

    /// Whether `open-session` has ever been observed for `wire_session_id`.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn session_exists(&self, wire_session_id: u8) -> bool {
        self.state.lock().expect("mock device mutex poisoned").sessions.contains_key(&wire_session_id)
    }
}

/// Bytes of a `clear-instance-buf` frame-index suffix this mock tolerates
/// folded into the raw LBA (§4.8: `HwFrame::release` ORs the masked frame
/// index into the LBA's low byte rather than carrying it in the payload).
/// Matches `xcoder_proto::lba::CLEAR_INSTANCE_FRAME_INDEX_MASK`.
const CLEAR_INDEX_MASK: u32 = 0xFF;

fn decode_write_lba(lba: u32) -> Option<(Operation, u8, bool, u8, u32)> {
    if let Ok(decoded) = lba::decode(lba) {
        return Some((decoded.operation, decoded.session_id, decoded.instance_type, decoded.hw_channel, 0));
    }
    let masked = lba & !CLEAR_INDEX_MASK;
    let frame_index = lba - masked;
    if let Ok(decoded) = lba::decode(masked) {
        if decoded.operation == Operation::ClearInstanceBuf {
            return Some((decoded.operation, decoded.session_id, decoded.instance_type, decoded.hw_channel, frame_index));
        }
    }
    None
}

impl BlockDevice for MockDevice {
    #[allow(clippy::expect_used)]
    fn write_pages(&self, lba: u32, buf: &AlignedBuffer) -> impl Future<Output = io::Result<()>> + Send {
        let result = (|| -> io::Result<()> {
            let (operation, wire_session_id, _instance_type, _hw_channel, frame_index) =
                decode_write_lba(lba).ok_or_else(|| io::Error::other("mock device: unrecognized LBA"))?;
            let payload = buf.to_vec();
            let mut state = self.state.lock().expect("mock device mutex poisoned");

            match operation {
                Operation::OpenSession => {
                    let (session_id, session_timestamp) =
                        if let Some(queue) = state.open_replies.get_mut(&wire_session_id) {
                            queue.pop_front().unwrap_or((state.next_auto_session_id, state.next_auto_timestamp))
                        } else {
                            (state.next_auto_session_id, state.next_auto_timestamp)
                        };
                    state.next_auto_session_id = state.next_auto_session_id.wrapping_add(1);
                    state.next_auto_timestamp = state.next_auto_timestamp.wrapping_add(1);
                    state.sessions.insert(wire_session_id, MockSession::new(session_id, session_timestamp));
                },
                Operation::CloseSession => {
                    if let Some(session) = state.sessions.get_mut(&wire_session_id) {
                        session.session_id = xcoder_proto::stats::SessionStats::CLOSED_SESSION_ID;
                    }
                },
                Operation::ClearInstanceBuf => {
                    let session = state.session_mut(wire_session_id);
                    *session.cleared_frames.entry(frame_index).or_insert(0) += 1;
                    session.free_frame_indices.push(frame_index);
                },
                Operation::ScalerAllocFrame | Operation::AiAllocFrame => {
                    let session = state.session_mut(wire_session_id);
                    let frame_index = session.allocate_frame_index();
                    if session.instance_reads.is_empty() {
                        session.instance_reads.push_back(frame_index.to_le_bytes().to_vec());
                    }
                    session.control_writes.push((operation, payload));
                },
                Operation::WriteInstance => {
                    let session = state.session_mut(wire_session_id);
                    session.instance_writes.push(payload);
                },
                _ => {
                    state.session_mut(wire_session_id).control_writes.push((operation, payload));
                },
            }
            Ok(())
        })();

        async move { result }
    }

    #[allow(clippy::expect_used)]
    fn read_pages(&self, lba: u32, buf: &mut AlignedBuffer) -> impl Future<Output = io::Result<()>> + Send {
        let result = (|| -> io::Result<Vec<u8>> {
            let decoded = lba::decode(lba).map_err(io::Error::other)?;
            let mut state = self.state.lock().expect("mock device mutex poisoned");

            match decoded.operation {
                Operation::QuerySessionStats => {
                    let session = state.session_mut(decoded.session_id);
                    Ok(session.stats_bytes().to_vec())
                },
                Operation::QueryInstanceBufInfo(kind) => {
                    let session = state.session_mut(decoded.session_id);
                    let value = session.buf_info.entry(kind).or_default().next();
                    Ok(value.to_le_bytes().to_vec())
                },
                Operation::ReadInstance | Operation::QueryNetworkLayer => {
                    let session = state.session_mut(decoded.session_id);
                    Ok(session.instance_reads.pop_front().unwrap_or_default())
                },
                Operation::QueryNetworkLayerSize => {
                    let session = state.session_mut(decoded.session_id);
                    let value = session.buf_info.entry(BufInfoKind::Acquire).or_default().next();
                    Ok(value.to_le_bytes().to_vec())
                },
                Operation::IdentifyDevice if decoded.session_id == WIRE_SESSION_UNASSIGNED => {
                    Ok(state.identify_payload.clone().unwrap_or_default())
                },
                Operation::QueryStreamInfo => {
                    let session = state.session_mut(decoded.session_id);
                    Ok(session.stream_info_payload.clone().unwrap_or_else(|| vec![0u8; xcoder_proto::STREAM_INFO_SIZE]))
                },
                _ => {
                    let session = state.session_mut(decoded.session_id);
                    Ok(session.instance_reads.pop_front().unwrap_or_default())
                },
            }
        })();

        async move {
            let bytes = result?;
            let dest = buf.as_mut_slice();
            let len = bytes.len().min(dest.len());
            dest[..len].copy_from_slice(&bytes[..len]);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_session_auto_assigns_sequential_ids() {
        let device = MockDevice::new();
        let lba = lba::encode(Operation::OpenSession, 1, false, 0);
        device.write_pages(lba, &AlignedBuffer::zeroed(1)).await.unwrap();

        let query_lba = lba::encode(Operation::QuerySessionStats, 1, false, 0);
        let mut buf = AlignedBuffer::zeroed(xcoder_proto::stats::SESSION_STATS_SIZE);
        device.read_pages(query_lba, &mut buf).await.unwrap();
        let stats = xcoder_proto::stats::SessionStats::parse(&buf).unwrap();
        assert_eq!(stats.session_id, 1);
    }

    #[tokio::test]
    async fn open_session_honors_scripted_reply() {
        let device = MockDevice::new();
        device.queue_open_reply(0x10, 0x1234, 1);
        let lba = lba::encode(Operation::OpenSession, 0x10, false, 0);
        device.write_pages(lba, &AlignedBuffer::zeroed(1)).await.unwrap();

        let query_lba = lba::encode(Operation::QuerySessionStats, 0x10, false, 0);
        let mut buf = AlignedBuffer::zeroed(xcoder_proto::stats::SESSION_STATS_SIZE);
        device.read_pages(query_lba, &mut buf).await.unwrap();
        let stats = xcoder_proto::stats::SessionStats::parse(&buf).unwrap();
        assert_eq!(stats.session_id, 0x1234);
        assert_eq!(stats.session_timestamp, 1);
    }

    #[tokio::test]
    async fn vpu_recovery_injection_is_observed_on_next_query() {
        let device = MockDevice::new();
        device.queue_open_reply(2, 1, 1);
        let open_lba = lba::encode(Operation::OpenSession, 2, false, 0);
        device.write_pages(open_lba, &AlignedBuffer::zeroed(1)).await.unwrap();
        device.inject_vpu_recovery(2);

        let query_lba = lba::encode(Operation::QuerySessionStats, 2, false, 0);
        let mut buf = AlignedBuffer::zeroed(xcoder_proto::stats::SESSION_STATS_SIZE);
        device.read_pages(query_lba, &mut buf).await.unwrap();
        let stats = xcoder_proto::stats::SessionStats::parse(&buf).unwrap();
        assert_eq!(stats.last_err, LastError::VpuRecovery);
    }

    #[tokio::test]
    async fn clear_instance_buf_is_idempotent_and_counted() {
        let device = MockDevice::new();
        device.queue_open_reply(3, 1, 1);
        let open_lba = lba::encode(Operation::OpenSession, 3, false, 0);
        device.write_pages(open_lba, &AlignedBuffer::zeroed(1)).await.unwrap();

        let base = lba::encode(Operation::ClearInstanceBuf, 3, false, 0);
        let page = AlignedBuffer::zeroed(1);
        device.write_pages(base + 17, &page).await.unwrap();
        device.write_pages(base + 17, &page).await.unwrap();

        assert_eq!(device.clear_count(3, 17), 2);
    }

    #[tokio::test]
    async fn buf_info_schedule_is_sticky_after_draining() {
        let device = MockDevice::new();
        device.queue_buf_info(4, BufInfoKind::ReadAvailable, 0);
        device.queue_buf_info(4, BufInfoKind::ReadAvailable, 262_144);

        let lba = lba::encode(Operation::QueryInstanceBufInfo(BufInfoKind::ReadAvailable), 4, false, 0);
        let mut buf = AlignedBuffer::zeroed(1);

        device.read_pages(lba, &mut buf).await.unwrap();
        assert_eq!(u32::from_le_bytes(buf[0..4].try_into().unwrap()), 0);

        device.read_pages(lba, &mut buf).await.unwrap();
        assert_eq!(u32::from_le_bytes(buf[0..4].try_into().unwrap()), 262_144);

        device.read_pages(lba, &mut buf).await.unwrap();
        assert_eq!(u32::from_le_bytes(buf[0..4].try_into().unwrap()), 262_144);
    }
}
