//! Session context, block-device abstraction, status oracle, error
//! classifier, and parameter validator for the NetInt-class transcoder
//! accelerator host driver.
//!
//! This crate has no opinion on transport (see [`device::BlockDevice`]) and
//! no opinion on codec-specific state machines (see `xcoder-client`); it is
//! the shared substrate both build on.

#![forbid(unsafe_code)]

pub mod classify;
pub mod context;
pub mod device;
pub mod env;
pub mod error;
pub mod status;
pub mod validate;

pub use context::{Context, ContextFlags, DeviceType, INVALID_SESSION_ID};
pub use device::{AlignedBuffer, BlockDevice};
pub use env::Environment;
pub use error::XcoderError;
pub use status::StatusOracle;
