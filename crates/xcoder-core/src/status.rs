//! The status oracle (C3): reads the accelerator's session stats payload
//! after a command and hands it to the error classifier (C4).
//!
//! Every command pairs with exactly one status-query read before the
//! caller observes a result (§8, property 1) — callers should go through
//! [`StatusOracle::query`] rather than parsing [`SessionStats`] themselves,
//! so that the diagnostic-logging path stays in one place.

use tracing::warn;
use xcoder_proto::{
    lba,
    stats::{SessionStats, SESSION_STATS_SIZE},
};

use crate::{
    classify::classify,
    context::Context,
    device::{AlignedBuffer, BlockDevice},
    error::XcoderError,
};

/// Reads and classifies session stats for one session.
pub struct StatusOracle<'a, D: BlockDevice> {
    device: &'a D,
}

impl<'a, D: BlockDevice> StatusOracle<'a, D> {
    /// Borrow a block device to query session stats over.
    pub fn new(device: &'a D) -> Self {
        Self { device }
    }

    /// Read and classify the session stats for `session_id` on
    /// `hw_channel`.
    ///
    /// On a transport failure, logs the LBA that was being read —
    /// decoded back into `(opcode, subtype, subsubtype, direction)` — so a
    /// failed read is diagnosable without a packet capture.
    ///
    /// # Errors
    ///
    /// Propagates the classified [`XcoderError`] (§7) or, if the transport
    /// itself failed, [`XcoderError::NvmeCmdFailed`].
    pub async fn query(&self, session_id: u8, hw_channel: u8) -> Result<SessionStats, XcoderError> {
        let query_lba =
            lba::encode(lba::Operation::QuerySessionStats, session_id, false, hw_channel);

        let mut buf = AlignedBuffer::zeroed(SESSION_STATS_SIZE);
        if let Err(err) = self.device.read_pages(query_lba, &mut buf).await {
            if let Ok(decoded) = lba::decode(query_lba) {
                warn!(
                    lba = query_lba,
                    operation = ?decoded.operation,
                    direction = ?decoded.operation.direction(),
                    "status query transport failure"
                );
            }
            return Err(XcoderError::NvmeCmdFailed(err.to_string()));
        }

        let stats = SessionStats::parse(&buf)?;
        classify(stats)
    }

    /// Query and classify `context`'s session stats, then apply the
    /// bookkeeping every caller must perform on the result (§4.3): declare
    /// the context invalid on a divergent session timestamp, reset the
    /// running failure counter on success, and otherwise increment it —
    /// except for [`XcoderError::VpuRecovery`], which is propagated without
    /// touching the counter, and [`XcoderError::Retry`], which counts
    /// towards the threshold but does not itself invalidate the session.
    /// Any other classification is fatal and marks `context` invalid, so a
    /// later caller gets [`XcoderError::InvalidSession`] without another
    /// I/O round-trip (§4.3).
    ///
    /// # Errors
    ///
    /// Propagates the classified [`XcoderError`], after recording its
    /// effect on `context`.
    pub async fn query_and_record(&self, context: &Context) -> Result<SessionStats, XcoderError> {
        match self.query(context.wire_session_id(), context.hw_channel()).await {
            Ok(stats) => {
                if !context.check_timestamp(stats.session_timestamp) {
                    return Err(XcoderError::InvalidSession);
                }
                context.reset_rc_error();
                Ok(stats)
            },
            Err(XcoderError::VpuRecovery) => Err(XcoderError::VpuRecovery),
            Err(XcoderError::Retry) => {
                context.record_rc_error();
                Err(XcoderError::Retry)
            },
            Err(err) => {
                context.record_rc_error();
                context.close();
                Err(err)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{future::Future, io, sync::Mutex};

    use super::*;

    struct FailingDevice;

    impl BlockDevice for FailingDevice {
        fn read_pages(
            &self,
            _lba: u32,
            _buf: &mut AlignedBuffer,
        ) -> impl Future<Output = io::Result<()>> + Send {
            async { Err(io::Error::other("simulated transport failure")) }
        }

        fn write_pages(
            &self,
            _lba: u32,
            _buf: &AlignedBuffer,
        ) -> impl Future<Output = io::Result<()>> + Send {
            async { Ok(()) }
        }
    }

    struct StaticDevice {
        response: Mutex<Vec<u8>>,
    }

    impl BlockDevice for StaticDevice {
        fn read_pages(
            &self,
            _lba: u32,
            buf: &mut AlignedBuffer,
        ) -> impl Future<Output = io::Result<()>> + Send {
            async move {
                let response = self.response.lock().expect("not poisoned");
                buf.as_mut_slice()[..response.len()].copy_from_slice(&response);
                Ok(())
            }
        }

        fn write_pages(
            &self,
            _lba: u32,
            _buf: &AlignedBuffer,
        ) -> impl Future<Output = io::Result<()>> + Send {
            async { Ok(()) }
        }
    }

    #[tokio::test]
    async fn transport_failure_is_classified_as_nvme_cmd_failed() {
        let device = FailingDevice;
        let oracle = StatusOracle::new(&device);
        let err = oracle.query(1, 0).await.unwrap_err();
        assert!(matches!(err, XcoderError::NvmeCmdFailed(_)));
    }

    #[tokio::test]
    async fn success_status_is_returned() {
        let mut response = vec![0u8; SESSION_STATS_SIZE];
        response[0..2].copy_from_slice(&0x1234u16.to_be_bytes());
        let device = StaticDevice { response: Mutex::new(response) };
        let oracle = StatusOracle::new(&device);
        let stats = oracle.query(1, 0).await.unwrap();
        assert_eq!(stats.session_id, 0x1234);
    }

    fn context() -> Context {
        Context::new(
            crate::context::DeviceType::Decoder,
            1,
            0,
            false,
            xcoder_proto::metadata::MetadataLayout::Current48,
            0x1234,
            7,
        )
    }

    fn response_with(last_err: u16, err_count: u32, session_timestamp: u64) -> Vec<u8> {
        let mut response = vec![0u8; SESSION_STATS_SIZE];
        response[0..2].copy_from_slice(&0x1234u16.to_be_bytes());
        response[4..8].copy_from_slice(&err_count.to_be_bytes());
        response[20..22].copy_from_slice(&last_err.to_be_bytes());
        response[24..32].copy_from_slice(&session_timestamp.to_be_bytes());
        response
    }

    #[tokio::test]
    async fn query_and_record_resets_the_counter_on_success() {
        let ctx = context();
        ctx.record_rc_error();
        let device = StaticDevice { response: Mutex::new(response_with(0, 0, 7)) };
        let oracle = StatusOracle::new(&device);
        oracle.query_and_record(&ctx).await.unwrap();
        assert_eq!(ctx.rc_error_count(), 0);
        assert!(!ctx.is_invalid());
    }

    #[tokio::test]
    async fn query_and_record_counts_retry_without_invalidating() {
        let ctx = context();
        let device = StaticDevice { response: Mutex::new(response_with(7, 0, 7)) };
        let oracle = StatusOracle::new(&device);
        let err = oracle.query_and_record(&ctx).await.unwrap_err();
        assert!(matches!(err, XcoderError::Retry));
        assert_eq!(ctx.rc_error_count(), 1);
        assert!(!ctx.is_invalid());
    }

    #[tokio::test]
    async fn query_and_record_does_not_count_vpu_recovery() {
        let ctx = context();
        let device = StaticDevice { response: Mutex::new(response_with(6, 0, 7)) };
        let oracle = StatusOracle::new(&device);
        let err = oracle.query_and_record(&ctx).await.unwrap_err();
        assert!(matches!(err, XcoderError::VpuRecovery));
        assert_eq!(ctx.rc_error_count(), 0);
        assert!(!ctx.is_invalid());
    }

    #[tokio::test]
    async fn query_and_record_invalidates_the_context_on_a_fatal_classification() {
        let ctx = context();
        let device = StaticDevice { response: Mutex::new(response_with(3, 0, 7)) };
        let oracle = StatusOracle::new(&device);
        let err = oracle.query_and_record(&ctx).await.unwrap_err();
        assert!(matches!(err, XcoderError::MemAlloc(_)));
        assert_eq!(ctx.rc_error_count(), 1);
        assert!(ctx.is_invalid());
    }

    #[tokio::test]
    async fn query_and_record_invalidates_on_timestamp_divergence() {
        let ctx = context();
        let device = StaticDevice { response: Mutex::new(response_with(0, 0, 99)) };
        let oracle = StatusOracle::new(&device);
        let err = oracle.query_and_record(&ctx).await.unwrap_err();
        assert!(matches!(err, XcoderError::InvalidSession));
        assert!(ctx.is_invalid());
    }
}
