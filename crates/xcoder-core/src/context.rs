//! The session context (§3): everything one opened session owns, guarded by
//! a single mutex so that a write LBA and its paired status-query read stay
//! atomic from the caller's point of view (§3 invariants, §5 concurrency).

use std::sync::Mutex;

use xcoder_proto::metadata::MetadataLayout;

use crate::device::AlignedBuffer;

/// Sentinel 16-bit session id meaning "closed"/"never opened".
pub const INVALID_SESSION_ID: u16 = 0xFFFF;

/// Which kind of accelerator instance this context drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Decoder session.
    Decoder,
    /// Encoder session.
    Encoder,
    /// Scaler session.
    Scaler,
    /// Frame-upload (host-to-device) session.
    Uploader,
    /// AI inference session.
    Ai,
}

/// Flags accumulated over a session's lifetime (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextFlags {
    /// Whether the next frame/packet read is the first one.
    pub is_first_frame: bool,
    /// Whether the caller has requested a drain and close.
    pub ready_to_close: bool,
    /// Whether low-delay mode is active.
    pub low_delay: bool,
    /// Whether this context was opened in P2P mode.
    pub is_p2p: bool,
}

/// The mutable state a context's mutex protects.
#[derive(Debug)]
struct ContextState {
    session_id: u16,
    session_timestamp: u64,
    frame_num: u64,
    pkt_num: u64,
    rc_error_count: u32,
    flags: ContextFlags,
    close_observed_by_keepalive: bool,
}

/// One opened session (§3).
///
/// A context is invalid once `session_id == INVALID_SESSION_ID`; every
/// operation must check this before issuing I/O (§3 invariants). The
/// block-device handle itself is intentionally not stored here — it is
/// borrowed per call, matching the shared-resource policy of letting the
/// device be shared across sessions while the context stays exclusive.
#[derive(Debug)]
pub struct Context {
    device_type: DeviceType,
    wire_session_id: u8,
    hw_channel: u8,
    instance_type: bool,
    meta_layout: MetadataLayout,
    zero_page_scratch: AlignedBuffer,
    state: Mutex<ContextState>,
}

impl Context {
    /// Construct a context for a newly opened session.
    ///
    /// `wire_session_id` is the 7-bit session slot the accelerator assigned
    /// at open, used to address every subsequent LBA (`xcoder_proto::lba`).
    /// `session_id`/`session_timestamp` are the pair reported back in
    /// [`xcoder_proto::stats::SessionStats`] and checked on every status
    /// read (§3 invariants) — a distinct, wider identifier from the wire
    /// session id.
    #[must_use]
    pub fn new(
        device_type: DeviceType,
        wire_session_id: u8,
        hw_channel: u8,
        instance_type: bool,
        meta_layout: MetadataLayout,
        session_id: u16,
        session_timestamp: u64,
    ) -> Self {
        Self {
            device_type,
            wire_session_id,
            hw_channel,
            instance_type,
            meta_layout,
            zero_page_scratch: AlignedBuffer::zeroed(1),
            state: Mutex::new(ContextState {
                session_id,
                session_timestamp,
                frame_num: 0,
                pkt_num: 0,
                rc_error_count: 0,
                flags: ContextFlags { is_first_frame: true, ..ContextFlags::default() },
                close_observed_by_keepalive: false,
            }),
        }
    }

    /// Which kind of accelerator instance this context drives.
    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// The 7-bit session slot used to address every LBA for this context.
    #[must_use]
    pub fn wire_session_id(&self) -> u8 {
        self.wire_session_id
    }

    /// The sub-engine selector this context addresses LBAs with.
    #[must_use]
    pub fn hw_channel(&self) -> u8 {
        self.hw_channel
    }

    /// The `instance_type` bit this context addresses LBAs with.
    #[must_use]
    pub fn instance_type(&self) -> bool {
        self.instance_type
    }

    /// Which decoder-metadata-trailer layout firmware uses, fixed at open
    /// time (§9, "firmware version gating").
    #[must_use]
    pub fn meta_layout(&self) -> MetadataLayout {
        self.meta_layout
    }

    /// The per-context zero-page scratch buffer (§5, "shared-resource
    /// policy"): allocated once at open, never resized.
    #[must_use]
    pub fn zero_page_scratch(&self) -> &AlignedBuffer {
        &self.zero_page_scratch
    }

    /// Current session id, or [`INVALID_SESSION_ID`] if closed.
    #[must_use]
    pub fn session_id(&self) -> u16 {
        self.state.lock().expect("context mutex poisoned").session_id
    }

    /// Opaque session timestamp returned at open.
    #[must_use]
    pub fn session_timestamp(&self) -> u64 {
        self.state.lock().expect("context mutex poisoned").session_timestamp
    }

    /// Whether this context is invalid (§3: `session_id == 0xFFFF`).
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.session_id() == INVALID_SESSION_ID
    }

    /// Check that the accelerator's reported session timestamp still
    /// matches this context's, declaring the context invalid on
    /// divergence (§3 invariants).
    pub fn check_timestamp(&self, observed: u64) -> bool {
        let mut guard = self.state.lock().expect("context mutex poisoned");
        if guard.session_id != INVALID_SESSION_ID && guard.session_timestamp != observed {
            guard.session_id = INVALID_SESSION_ID;
            return false;
        }
        true
    }

    /// Mark the context closed, invalidating its session id.
    pub fn close(&self) {
        self.state.lock().expect("context mutex poisoned").session_id = INVALID_SESSION_ID;
    }

    /// Record that a command has observed one more frame.
    pub fn record_frame(&self) {
        let mut guard = self.state.lock().expect("context mutex poisoned");
        guard.frame_num += 1;
        guard.flags.is_first_frame = false;
    }

    /// Record that a command has observed one more packet.
    pub fn record_packet(&self) {
        self.state.lock().expect("context mutex poisoned").pkt_num += 1;
    }

    /// Increment the running rate-control error counter (§4.3: "increments
    /// on every non-OK classification except VpuRecovery").
    pub fn record_rc_error(&self) {
        self.state.lock().expect("context mutex poisoned").rc_error_count += 1;
    }

    /// Reset the running rate-control error counter (§4.3: "resets on OK").
    pub fn reset_rc_error(&self) {
        self.state.lock().expect("context mutex poisoned").rc_error_count = 0;
    }

    /// Current value of the running rate-control error counter.
    #[must_use]
    pub fn rc_error_count(&self) -> u32 {
        self.state.lock().expect("context mutex poisoned").rc_error_count
    }

    /// Read a copy of the current flag set.
    #[must_use]
    pub fn flags(&self) -> ContextFlags {
        self.state.lock().expect("context mutex poisoned").flags
    }

    /// Mutate the flag set.
    pub fn with_flags_mut(&self, f: impl FnOnce(&mut ContextFlags)) {
        let mut guard = self.state.lock().expect("context mutex poisoned");
        f(&mut guard.flags);
    }

    /// The keep-alive task calls this when it observes a fatal
    /// classification (§3 invariants): the next foreground call must see
    /// and propagate it.
    pub fn mark_keepalive_failure(&self) {
        self.state.lock().expect("context mutex poisoned").close_observed_by_keepalive = true;
    }

    /// Whether the keep-alive task has observed a fatal classification
    /// since the last check.
    #[must_use]
    pub fn take_keepalive_failure(&self) -> bool {
        let mut guard = self.state.lock().expect("context mutex poisoned");
        std::mem::take(&mut guard.close_observed_by_keepalive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_context() -> Context {
        Context::new(DeviceType::Decoder, 1, 0, false, MetadataLayout::Current48, 0x1234, 42)
    }

    #[test]
    fn new_context_is_valid() {
        let ctx = open_context();
        assert!(!ctx.is_invalid());
        assert_eq!(ctx.session_id(), 0x1234);
    }

    #[test]
    fn close_invalidates_session_id() {
        let ctx = open_context();
        ctx.close();
        assert!(ctx.is_invalid());
        assert_eq!(ctx.session_id(), INVALID_SESSION_ID);
    }

    #[test]
    fn timestamp_divergence_invalidates_context() {
        let ctx = open_context();
        assert!(ctx.check_timestamp(42));
        assert!(!ctx.is_invalid());
        assert!(!ctx.check_timestamp(99));
        assert!(ctx.is_invalid());
    }

    #[test]
    fn keepalive_failure_is_observed_once() {
        let ctx = open_context();
        ctx.mark_keepalive_failure();
        assert!(ctx.take_keepalive_failure());
        assert!(!ctx.take_keepalive_failure());
    }

    #[test]
    fn new_context_starts_on_its_first_frame() {
        let ctx = open_context();
        assert!(ctx.flags().is_first_frame);
    }

    #[test]
    fn record_frame_clears_is_first_frame() {
        let ctx = open_context();
        ctx.with_flags_mut(|f| f.is_first_frame = true);
        ctx.record_frame();
        assert!(!ctx.flags().is_first_frame);
    }

    #[test]
    fn rc_error_count_accumulates_and_resets() {
        let ctx = open_context();
        ctx.record_rc_error();
        ctx.record_rc_error();
        assert_eq!(ctx.rc_error_count(), 2);
        ctx.reset_rc_error();
        assert_eq!(ctx.rc_error_count(), 0);
    }
}
