//! Session state machines, keep-alive task, and HW-frame descriptor plane,
//! built on `xcoder-core`'s context/device/status layer and
//! `xcoder-codec`'s bitstream ring, DTS FIFO, and SEI codec.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// The HW-frame descriptor plane (C10).
pub mod hwframe;
/// The keep-alive background task (C5).
pub mod keepalive;
/// The open-session handshake.
pub mod open;
/// Per-device-type session state machines.
pub mod session;

pub use hwframe::{HwFrame, P2pRange, SubDescriptor};
pub use keepalive::{keepalive_interval, spawn as spawn_keepalive, KeepAliveHandle};
pub use open::open_session;
pub use session::{
    ai::AiSession,
    decoder::{DecodedFrame, DecoderSession},
    encoder::{EncodedPacket, EncoderSession},
    scaler::ScalerSession,
    state::{InvalidStateError, SessionState},
    uploader::UploaderSession,
};
