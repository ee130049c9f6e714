//! S1: open an encoder session on a mock device that responds to
//! `open-session` with `{session_id=0x1234, timestamp=1}`, let its
//! keep-alive task tick, then close. Expects the session to become
//! `Closed` (the context's `session_id` becomes `0xFFFF`, §3) and the
//! keep-alive task to have stopped ticking.

use std::sync::Arc;
use std::time::Duration;

use xcoder_client::SessionState;
use xcoder_core::{Context, DeviceType};
use xcoder_mock::{MockDevice, SimEnv};
use xcoder_proto::{lba::Operation, metadata::MetadataLayout};

#[tokio::test(start_paused = true)]
async fn open_close_invalidates_session_and_stops_keepalive() {
    let device = Arc::new(MockDevice::new());
    device.queue_open_reply(5, 0x1234, 1);

    let mut session = xcoder_harness::open_encoder(&device, 5).await.unwrap();
    assert_eq!(session.state(), SessionState::Opened);
    session.configure().unwrap();
    session.start_streaming().unwrap();

    // A second context onto the same wire session id, driving the
    // keep-alive task independently of the session object's own context
    // (§9: "implement as one task per session").
    let keepalive_context = Arc::new(Context::new(DeviceType::Encoder, 5, 0, false, MetadataLayout::Current48, 0x1234, 1));
    let session_timeout_us = 3_000_000;
    let handle = xcoder_client::spawn_keepalive(SimEnv::new(7), Arc::clone(&device), Arc::clone(&keepalive_context), session_timeout_us);

    tokio::time::advance(Duration::from_micros(session_timeout_us / 3 + 1)).await;
    tokio::task::yield_now().await;
    assert_eq!(device.control_write_count(5, Operation::KeepAlive), 1);

    session.close(device.as_ref()).await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    handle.cancel().await;
    let ticks_at_cancel = device.control_write_count(5, Operation::KeepAlive);
    tokio::time::advance(Duration::from_micros(session_timeout_us * 4)).await;
    assert_eq!(device.control_write_count(5, Operation::KeepAlive), ticks_at_cancel, "no further ticks after cancellation");
}
