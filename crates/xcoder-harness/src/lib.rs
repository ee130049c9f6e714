//! Shared scaffolding for the scenario and property tests under `tests/`:
//! opening sessions against [`xcoder_mock::MockDevice`] and building the
//! raw trailer bytes a decoder read expects back.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use xcoder_client::{
    open_session,
    session::{
        ai::AiSession,
        decoder::DecoderSession,
        encoder::EncoderSession,
        scaler::ScalerSession,
        uploader::{PoolKind, UploaderSession},
    },
};
use xcoder_core::{DeviceType, XcoderError};
use xcoder_mock::MockDevice;
use xcoder_proto::metadata::MetadataLayout;

/// Open a decoder session with `wire_session_id` against `device`, which
/// must already have an `open-session` reply scripted (or accept the
/// device's auto-assigned default).
pub async fn open_decoder(device: &MockDevice, wire_session_id: u8, pic_reorder_delay: usize) -> Result<DecoderSession, XcoderError> {
    let ctx = open_session(device, DeviceType::Decoder, wire_session_id, 0, false, MetadataLayout::Current48).await?;
    Ok(DecoderSession::new(ctx, pic_reorder_delay))
}

/// Open an encoder session with `wire_session_id` against `device`.
pub async fn open_encoder(device: &MockDevice, wire_session_id: u8) -> Result<EncoderSession, XcoderError> {
    let ctx = open_session(device, DeviceType::Encoder, wire_session_id, 0, false, MetadataLayout::Current48).await?;
    Ok(EncoderSession::new(ctx, xcoder_proto::enc_meta::EncMetaLayout::Current))
}

/// Open a scaler session with `wire_session_id` against `device`.
pub async fn open_scaler(device: &MockDevice, wire_session_id: u8, blit_mode: xcoder_client::session::scaler::BlitMode) -> Result<ScalerSession, XcoderError> {
    let ctx = open_session(device, DeviceType::Scaler, wire_session_id, 0, false, MetadataLayout::Current48).await?;
    Ok(ScalerSession::new(ctx, blit_mode))
}

/// Open an AI session with `wire_session_id` against `device`.
pub async fn open_ai(device: &MockDevice, wire_session_id: u8) -> Result<AiSession, XcoderError> {
    let ctx = open_session(device, DeviceType::Ai, wire_session_id, 0, false, MetadataLayout::Current48).await?;
    Ok(AiSession::new(ctx))
}

/// Open an uploader session with `wire_session_id` against `device`.
pub async fn open_uploader(device: &MockDevice, wire_session_id: u8) -> Result<UploaderSession, XcoderError> {
    let ctx = open_session(device, DeviceType::Uploader, wire_session_id, 0, false, MetadataLayout::Current48).await?;
    Ok(UploaderSession::new(ctx, PoolKind::Normal))
}

/// Build a `total_len`-byte decoder read payload whose final 48 bytes are
/// a [`MetadataLayout::Current48`] trailer with the given `frame_offset`
/// and no SEI entries — the shape [`DecoderSession::read`] slices its
/// trailer out of (the last `trailer_size()` bytes of the full
/// page-rounded buffer, not of whatever a test happens to script).
#[must_use]
pub fn decoder_payload_with_frame_offset(total_len: usize, frame_offset: u32) -> Vec<u8> {
    let mut buf = vec![0u8; total_len];
    let trailer_size = MetadataLayout::Current48.trailer_size();
    let trailer_start = total_len - trailer_size;
    // Field layout matches `RawTrailer48` (§6): crop rect (8 bytes),
    // frame_width/frame_height (4 bytes), pict_type + reserved0 (2 bytes),
    // then frame_offset.
    buf[trailer_start + 14..trailer_start + 18].copy_from_slice(&frame_offset.to_be_bytes());
    buf
}
