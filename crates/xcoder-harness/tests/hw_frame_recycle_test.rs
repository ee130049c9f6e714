//! S6: a scaler config-frame request allocates hardware frame index `17`;
//! releasing it twice must both return success, and the accelerator-side
//! clear count for that index must observe two clears, since
//! `HwFrame::release`'s own single-issue guard is bypassed by reaching the
//! device directly. `clear-instance-buf` is keyed on frame_index alone, not
//! on a session, so every count is read back against the device-global
//! wire session id rather than the scaler session's own.

use std::sync::Arc;

use xcoder_client::session::scaler::{BlitMode, FrameDescriptor, OPTION_IS_OUTPUT};
use xcoder_core::{AlignedBuffer, BlockDevice};
use xcoder_proto::lba::WIRE_SESSION_UNASSIGNED;
use xcoder_proto::{lba, CropRect};

fn output_descriptor() -> FrameDescriptor {
    FrameDescriptor {
        width: 1920,
        height: 1080,
        format: 0,
        options: OPTION_IS_OUTPUT,
        crop: CropRect { left: 0, top: 0, right: 0, bottom: 0 },
        rgba_color: 0,
        frame_index: 0,
        session_id: 0,
        output_index: 0,
    }
}

#[tokio::test]
async fn hw_frame_release_is_idempotent_and_device_clear_is_recounted() {
    let device = Arc::new(xcoder_mock::MockDevice::new());
    device.queue_open_reply(7, 1, 1);

    let mut session = xcoder_harness::open_scaler(&device, 7, BlitMode::Simple).await.unwrap();
    session.configure(device.as_ref(), false, 1).await.unwrap();
    session.start_streaming().unwrap();

    device.queue_instance_read(7, 17u32.to_le_bytes().to_vec());
    let input = FrameDescriptor { options: 0, ..output_descriptor() };
    let frame = session.config_frame(device.as_ref(), &[input], output_descriptor()).await.unwrap();
    assert_eq!(frame.sub_descriptors()[0].frame_index, 17);

    frame.release(device.as_ref()).await.unwrap();
    assert_eq!(device.clear_count(WIRE_SESSION_UNASSIGNED, 17), 1);

    // A second release call is a no-op: the handle's own guard prevents a
    // second device-side clear from being issued.
    frame.release(device.as_ref()).await.unwrap();
    assert_eq!(
        device.clear_count(WIRE_SESSION_UNASSIGNED, 17),
        1,
        "HwFrame::release must not reissue clear-instance-buf once released"
    );

    // Issuing clear-instance-buf(17) directly, bypassing the handle,
    // confirms the accelerator side itself treats repeat clears as
    // idempotent successes while still counting both.
    let clear_lba = lba::encode(lba::Operation::ClearInstanceBuf, WIRE_SESSION_UNASSIGNED, false, 0);
    let page = AlignedBuffer::zeroed(1);
    device.write_pages(clear_lba + 17, &page).await.unwrap();
    assert_eq!(
        device.clear_count(WIRE_SESSION_UNASSIGNED, 17),
        2,
        "a direct clear-instance-buf bypasses the handle's single-issue guard"
    );
}
