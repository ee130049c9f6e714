//! Session open handshake (§3, §4.1): write `open-session`, then read back
//! the `(session_id, session_timestamp)` pair the accelerator assigned,
//! exactly like every other write's paired status query (§8, property 1).

use xcoder_core::{AlignedBuffer, BlockDevice, Context, DeviceType, StatusOracle, XcoderError};
use xcoder_proto::{encode, metadata::MetadataLayout, Operation};

/// Open a new session and wrap the assigned `(session_id, session_timestamp)`
/// pair in a freshly constructed [`Context`].
///
/// `wire_session_id` is the 7-bit LBA slot the host has reserved for this
/// session; this library does not allocate wire session slots itself (§9) —
/// that policy lives with the caller, the same way it owns `hw_channel`
/// routing.
///
/// # Errors
///
/// Propagates a transport failure or a non-success classification from the
/// paired status query (§7).
pub async fn open_session<D: BlockDevice>(
    device: &D,
    device_type: DeviceType,
    wire_session_id: u8,
    hw_channel: u8,
    instance_type: bool,
    meta_layout: MetadataLayout,
) -> Result<Context, XcoderError> {
    let lba = encode(Operation::OpenSession, wire_session_id, instance_type, hw_channel);
    let buf = AlignedBuffer::zeroed(1);
    device.write_pages(lba, &buf).await.map_err(XcoderError::from)?;

    let oracle = StatusOracle::new(device);
    let stats = oracle.query(wire_session_id, hw_channel).await?;

    Ok(Context::new(
        device_type,
        wire_session_id,
        hw_channel,
        instance_type,
        meta_layout,
        stats.session_id,
        stats.session_timestamp,
    ))
}

#[cfg(test)]
mod tests {
    use std::{future::Future, io, sync::Mutex};

    use xcoder_proto::stats::SESSION_STATS_SIZE;

    use super::*;

    struct FixedReplyDevice {
        session_id: u16,
        session_timestamp: u64,
        observed_open_lba: Mutex<Option<u32>>,
    }

    impl BlockDevice for FixedReplyDevice {
        fn write_pages(&self, lba: u32, _buf: &AlignedBuffer) -> impl Future<Output = io::Result<()>> + Send {
            *self.observed_open_lba.lock().expect("not poisoned") = Some(lba);
            async { Ok(()) }
        }

        fn read_pages(&self, _lba: u32, buf: &mut AlignedBuffer) -> impl Future<Output = io::Result<()>> + Send {
            let mut response = vec![0u8; SESSION_STATS_SIZE];
            response[0..2].copy_from_slice(&self.session_id.to_be_bytes());
            response[24..32].copy_from_slice(&self.session_timestamp.to_be_bytes());
            async move {
                buf.as_mut_slice()[..response.len()].copy_from_slice(&response);
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn open_session_wraps_the_assigned_ids() {
        let device = FixedReplyDevice { session_id: 0x1234, session_timestamp: 1, observed_open_lba: Mutex::new(None) };
        let ctx = open_session(&device, DeviceType::Decoder, 0x10, 0, false, MetadataLayout::Current48).await.unwrap();
        assert_eq!(ctx.session_id(), 0x1234);
        assert_eq!(ctx.session_timestamp(), 1);
        assert!(!ctx.is_invalid());

        let observed = xcoder_proto::lba::decode(device.observed_open_lba.lock().expect("not poisoned").unwrap()).unwrap();
        assert_eq!(observed.operation, Operation::OpenSession);
        assert_eq!(observed.session_id, 0x10);
    }
}
