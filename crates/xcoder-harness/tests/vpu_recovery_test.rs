//! S5: the mock reports `last_err = vpu_recovery` for a session. A
//! foreground call that pairs its write with a status query must surface
//! [`XcoderError::VpuRecovery`], while the keep-alive task, observing the
//! same status, must treat it as non-fatal and keep ticking rather than
//! marking the context's keep-alive failure.

use std::sync::Arc;
use std::time::Duration;

use xcoder_core::{Context, DeviceType, XcoderError};
use xcoder_mock::{MockDevice, SimEnv};
use xcoder_proto::{lba::BufInfoKind, lba::Operation, metadata::MetadataLayout};

#[tokio::test]
async fn foreground_call_surfaces_vpu_recovery() {
    let device = Arc::new(MockDevice::new());
    device.queue_open_reply(6, 1, 1);
    device.queue_buf_info(6, BufInfoKind::WriteAvailable, u32::MAX);

    let mut session = xcoder_harness::open_decoder(&device, 6, 0).await.unwrap();
    session.configure(false).unwrap();
    session.start_streaming().unwrap();

    device.inject_vpu_recovery(6);

    // `is_sos` routes the write through `issue_control(SetSos)`, which
    // pairs with a status query before the write itself is attempted.
    let err = session.write(device.as_ref(), &vec![0u8; 256], 0, 0, 0, true, false, None).await.unwrap_err();
    assert!(matches!(err, XcoderError::VpuRecovery));
}

#[tokio::test(start_paused = true)]
async fn keepalive_treats_vpu_recovery_as_non_fatal() {
    let device = Arc::new(MockDevice::new());
    device.queue_open_reply(6, 1, 1);
    device.inject_vpu_recovery(6);

    let context = Arc::new(Context::new(DeviceType::Decoder, 6, 0, false, MetadataLayout::Current48, 1, 1));
    let session_timeout_us = 3_000_000;
    let handle = xcoder_client::spawn_keepalive(SimEnv::new(11), Arc::clone(&device), Arc::clone(&context), session_timeout_us);

    // Two ticks' worth of virtual time: a keep-alive task that treated
    // `vpu_recovery` as fatal would have exited after the first.
    tokio::time::advance(Duration::from_micros(2 * (session_timeout_us / 3) + 1)).await;
    tokio::task::yield_now().await;

    assert!(device.control_write_count(6, Operation::KeepAlive) >= 2, "a non-fatal status must not stop the keep-alive loop");
    assert!(!context.is_invalid(), "vpu_recovery must not mark the context's keep-alive failure");

    handle.cancel().await;
}
