//! S3: write three packets with DTS `0, 33, 66` to a decoder configured
//! with `pic_reorder_delay = 2`. After the first write, a read finds the
//! buffer underfed (not enough look-ahead yet); after the third write, a
//! read succeeds with the oldest queued DTS, `0`, popped with no
//! reorder-delay padding.

use std::sync::Arc;

use xcoder_core::XcoderError;
use xcoder_proto::lba::BufInfoKind;

#[tokio::test]
async fn reorder_delay_holds_back_until_enough_lookahead_accumulates() {
    let device = Arc::new(xcoder_mock::MockDevice::new());
    device.queue_open_reply(2, 1, 1);
    device.queue_buf_info(2, BufInfoKind::WriteAvailable, u32::MAX);

    let mut session = xcoder_harness::open_decoder(&device, 2, 2).await.unwrap();
    session.configure(false).unwrap();
    session.start_streaming().unwrap();

    for dts in [0i64, 33, 66] {
        session.write(device.as_ref(), &vec![0u8; 256], dts, dts, 0, false, false, None).await.unwrap();

        // Only after this write does the FIFO hold enough look-ahead to
        // emit; a read attempted any earlier must report underfed.
        if dts != 66 {
            device.queue_buf_info(2, BufInfoKind::ReadAvailable, 5000);
            let err = session.read(device.as_ref(), 48).await.unwrap_err();
            assert!(matches!(err, XcoderError::NotEnoughLookahead), "buffer should be reported underfed before the third write");
        }
    }

    let payload = xcoder_harness::decoder_payload_with_frame_offset(4096, 0);
    device.queue_buf_info(2, BufInfoKind::ReadAvailable, 4096);
    device.queue_instance_read(2, payload);

    let frame = session.read(device.as_ref(), 48).await.unwrap().expect("third write supplies enough look-ahead to emit");
    assert_eq!(frame.dts, 0, "the oldest queued DTS pops first, with no reorder-delay padding");
}
