//! S2: write a single AVC packet with `pts=1000, dts=0`. The mock replies
//! with 262144 bytes of "available" after one retry. Reading one packet
//! back must recover `pts=1000` and pop exactly one DTS FIFO entry.

use std::sync::Arc;

use xcoder_proto::lba::BufInfoKind;

#[tokio::test]
async fn packet_in_packet_out_recovers_pts() {
    let device = Arc::new(xcoder_mock::MockDevice::new());
    device.queue_open_reply(1, 1, 1);

    let mut session = xcoder_harness::open_decoder(&device, 1, 0).await.unwrap();
    session.configure(false).unwrap();
    session.start_streaming().unwrap();

    // The write path probes write-available before issuing the packet;
    // make sure it always reports enough room.
    device.queue_buf_info(1, BufInfoKind::WriteAvailable, u32::MAX);

    let packet = vec![0xAB; 8192];
    session.write(device.as_ref(), &packet, 1000, 0, 0, false, false, None).await.unwrap();

    // One retry before data becomes available, as S2 specifies.
    device.queue_buf_info(1, BufInfoKind::ReadAvailable, 0);
    device.queue_buf_info(1, BufInfoKind::ReadAvailable, 262_144);

    let payload = xcoder_harness::decoder_payload_with_frame_offset(262_144, 4096);
    device.queue_instance_read(1, payload);

    let frame = session.read(device.as_ref(), 48).await.unwrap().expect("a frame should be recovered");
    assert_eq!(frame.pts, 1000);
    assert!(!frame.end_of_stream);
}
