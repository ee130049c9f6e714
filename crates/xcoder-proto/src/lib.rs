//! Wire types for the NVMe-mapped transcoder accelerator command surface.
//!
//! This crate owns every byte layout the rest of the workspace needs to
//! agree on with the accelerator: the LBA command encoding (C1), the
//! identify payload, the decoder metadata trailer and its SEI table, the
//! encoder per-packet metadata header, and the session stats payload that
//! backs the status oracle (C3). Nothing here touches I/O; every type is a
//! pure function from bytes to a parsed value or back.

#![forbid(unsafe_code)]

pub mod enc_meta;
pub mod errors;
pub mod identify;
pub mod lba;
pub mod metadata;
pub mod stats;
pub mod stream_info;

pub use enc_meta::{EncMeta, EncMetaLayout, Ssim};
pub use errors::{ProtocolError, Result};
pub use identify::{DdrConfig, EngineCounters, Identify, NETINT_PCI_VENDOR_ID};
pub use lba::{decode, encode, BufInfoKind, Decoded, Direction, Operation, ALL_OPERATIONS};
pub use metadata::{CropRect, MetadataLayout, MetadataTrailer, SeiEntry};
pub use stats::{LastError, SessionStats};
pub use stream_info::{PixelFormat, StreamInfo, STREAM_INFO_SIZE};
