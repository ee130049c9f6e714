//! The LBA command protocol (C1).
//!
//! The accelerator has no command queue of its own: every control, data-in,
//! data-out and query operation is encoded as a read or write to a synthetic
//! Logical Block Address. This module is the single place that knows how to
//! turn `(operation, session, instance)` into that address, and back.
//!
//! Bit layout of the 32-bit LBA:
//!
//! ```text
//! 31          26 25         19 18   17      15 14           8 7     4 3     0
//! +-------------+-------------+---+-----------+---------------+-------+-------+
//! |  hw_channel | session_id  |ity| window_sel |  opcode_index | subty | subsub|
//! +-------------+-------------+---+-----------+---------------+-------+-------+
//! ```
//!
//! `window_sel` and `opcode_index` together are the ten bits the design calls
//! the "opcode region base": the top three bits pick one of the three 128 MiB
//! windows (plus the four window-selector values that fall inside the 512
//! MiB prologue), the low seven bits pick one of up to 128 operations inside
//! that window. `subtype`/`subsubtype` distinguish variants of the same
//! operation (e.g. the five flavours of query-instance-buf-info).
//!
//! Encoding is pure and allocation-free, as required by C1: it is just bit
//! arithmetic over plain integers.

use crate::errors::{ProtocolError, Result};

/// Page size the accelerator's synthetic address space is aligned to.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`; an LBA is a byte offset shifted right by this amount.
pub const LBA_BIT_OFFSET: u32 = 12;

/// Size in blocks of the 512 MiB prologue that precedes the opcode window.
pub const PROLOGUE_BLOCKS: u32 = (512 * 1024 * 1024) / PAGE_SIZE;

/// Size in blocks of each of the three 128 MiB windows (control/read/write).
pub const WINDOW_BLOCKS: u32 = (128 * 1024 * 1024) / PAGE_SIZE;

/// First LBA of the control (opcode) window: `512 MiB / 4096`.
pub const CONTROL_WINDOW_BASE: u32 = PROLOGUE_BLOCKS;

/// First LBA of the read-data window.
pub const READ_WINDOW_BASE: u32 = CONTROL_WINDOW_BASE + WINDOW_BLOCKS;

/// First LBA of the write-data window.
pub const WRITE_WINDOW_BASE: u32 = READ_WINDOW_BASE + WINDOW_BLOCKS;

/// `window_sel` value of the control window (`CONTROL_WINDOW_BASE >>
/// WINDOW_SEL_SHIFT`).
const WINDOW_SEL_CONTROL: u32 = CONTROL_WINDOW_BASE >> WINDOW_SEL_SHIFT;
const WINDOW_SEL_READ: u32 = READ_WINDOW_BASE >> WINDOW_SEL_SHIFT;
const WINDOW_SEL_WRITE: u32 = WRITE_WINDOW_BASE >> WINDOW_SEL_SHIFT;

const HW_CHANNEL_SHIFT: u32 = 26;
const HW_CHANNEL_MASK: u32 = 0x3F;
const SESSION_ID_SHIFT: u32 = 19;
const SESSION_ID_MASK: u32 = 0x7F;
const INSTANCE_TYPE_SHIFT: u32 = 18;
const WINDOW_SEL_SHIFT: u32 = 15;
const WINDOW_SEL_MASK: u32 = 0x7;
const OPCODE_INDEX_SHIFT: u32 = 8;
const OPCODE_INDEX_MASK: u32 = 0x7F;
const SUBTYPE_SHIFT: u32 = 4;
const SUBTYPE_MASK: u32 = 0xF;
const SUBSUBTYPE_MASK: u32 = 0xF;

/// Sentinel 7-bit session id meaning "no session" at the wire level (used
/// only for device-global commands issued before any session exists, e.g.
/// identify). Distinct from the 16-bit `Context` session id sentinel
/// `0xFFFF` (§3), which lives above this protocol layer.
pub const WIRE_SESSION_UNASSIGNED: u8 = 0x7F;

/// Bits available to fold a `clear-instance-buf` frame index into the LBA's
/// `(subtype, subsubtype)` region (§4.8). `ClearInstanceBuf`'s own
/// `opcode_index` sits directly above this range at
/// `OPCODE_INDEX_SHIFT`/bit 8, so a frame index must be masked to this width
/// before being folded in, or it corrupts the opcode bits into an unrelated
/// operation.
pub const CLEAR_INSTANCE_FRAME_INDEX_MASK: u32 = 0xFF;

/// Which of the three command windows an operation lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The 128 MiB control (opcode) window: configuration, session
    /// lifecycle, and status queries.
    Control,
    /// The 128 MiB read-data window: the accelerator streams bytes to the
    /// host (decoded frames, encoded packets read back, network weights).
    ReadData,
    /// The 128 MiB write-data window: the host streams bytes to the
    /// accelerator (input packets, input frames, network weights).
    WriteData,
}

impl Direction {
    const fn window_base(self) -> u32 {
        match self {
            Self::Control => CONTROL_WINDOW_BASE,
            Self::ReadData => READ_WINDOW_BASE,
            Self::WriteData => WRITE_WINDOW_BASE,
        }
    }

    const fn window_sel(self) -> u32 {
        match self {
            Self::Control => WINDOW_SEL_CONTROL,
            Self::ReadData => WINDOW_SEL_READ,
            Self::WriteData => WINDOW_SEL_WRITE,
        }
    }

    fn from_window_sel(sel: u32) -> Option<Self> {
        match sel {
            WINDOW_SEL_CONTROL => Some(Self::Control),
            WINDOW_SEL_READ => Some(Self::ReadData),
            WINDOW_SEL_WRITE => Some(Self::WriteData),
            _ => None,
        }
    }
}

/// Every LBA-addressed operation the accelerator recognises (§4.1).
///
/// Each variant carries its sub-variants directly (e.g. the five flavours
/// of query-instance-buf-info) rather than encoding them as a bare
/// `subtype` integer the caller has to remember.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Open a new session.
    OpenSession,
    /// Close an existing session.
    CloseSession,
    /// Keep-alive heartbeat write.
    KeepAlive,
    /// Configure the keep-alive timeout for a session.
    KeepAliveTimeoutSet,
    /// Announce the host-side SW version (firmware >= 6.1 only).
    SwVersionAnnounce,
    /// Query active stream geometry (width/height/stride/format/bit depth).
    QueryStreamInfo,
    /// Query `(session_id, session_timestamp, err_count, last_rc, last_err)`.
    QuerySessionStats,
    /// Read the identify payload.
    IdentifyDevice,
    /// Query whether EOS has been fully flushed.
    QueryEos,
    /// Query cached network binary size (AI sessions).
    QueryNetworkLayerSize,
    /// Read input/output tensor layer descriptors (AI sessions).
    QueryNetworkLayer,
    /// Mark the next written packet as start-of-stream.
    SetSos,
    /// Mark the next written packet as end-of-stream.
    SetEos,
    /// Pre-configure the length of the next write.
    SetWriteLen,
    /// Push encoder configuration parameters.
    SetEncoderParams,
    /// Push decoder configuration parameters.
    SetDecoderParams,
    /// Push scaler configuration parameters.
    SetScalerParams,
    /// Push AI session configuration parameters.
    SetAiParams,
    /// Notify the accelerator of an in-stream sequence change.
    SetSequenceChange,
    /// Allocate a scaler output frame.
    ScalerAllocFrame,
    /// Allocate an AI inference frame.
    AiAllocFrame,
    /// Read a decoded frame / encoded packet / inference output instance.
    ReadInstance,
    /// Write an input packet / input frame / inference input instance.
    WriteInstance,
    /// Release ownership of a hardware-resident frame buffer.
    ClearInstanceBuf,
    /// Configure read-side transfer parameters.
    SetReadConfig,
    /// Configure write-side transfer parameters.
    SetWriteConfig,
    /// Query instance buffer availability/status, in one of five flavours.
    QueryInstanceBufInfo(BufInfoKind),
}

/// The five flavours of `query-instance-buf-info` (§4.1, §4.5.1, §4.5.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufInfoKind {
    /// How many bytes are free to write.
    WriteAvailable,
    /// How many bytes are ready to read.
    ReadAvailable,
    /// Blocking variant of `ReadAvailable` used in low-delay mode.
    ReadAvailableBusy,
    /// Blocking variant of `WriteAvailable`.
    WriteAvailableBusy,
    /// Free slot query for the uploader's HW-frame pool.
    UploadAvailable,
    /// Free slot query used by the scaler/AI frame allocator.
    Acquire,
}

impl Operation {
    /// Which command window this operation is addressed in.
    #[must_use]
    pub fn direction(self) -> Direction {
        coords_of(self).0
    }
}

/// `(opcode_index, subtype, subsubtype)` — the in-window coordinates of one
/// operation. `Direction` is tracked separately by the caller/table.
type Coords = (u32, u32, u32);

fn coords_of(op: Operation) -> (Direction, Coords) {
    use BufInfoKind::{Acquire, ReadAvailable, ReadAvailableBusy, UploadAvailable, WriteAvailable, WriteAvailableBusy};
    use Direction::{Control, ReadData, WriteData};
    use Operation::{
        AiAllocFrame, ClearInstanceBuf, CloseSession, IdentifyDevice, KeepAlive, KeepAliveTimeoutSet,
        OpenSession, QueryEos, QueryInstanceBufInfo, QueryNetworkLayer, QueryNetworkLayerSize,
        QuerySessionStats, QueryStreamInfo, ReadInstance, ScalerAllocFrame, SetAiParams,
        SetDecoderParams, SetEncoderParams, SetEos, SetReadConfig, SetScalerParams,
        SetSequenceChange, SetSos, SetWriteConfig, SetWriteLen, SwVersionAnnounce, WriteInstance,
    };

    match op {
        OpenSession => (Control, (0, 0, 0)),
        CloseSession => (Control, (1, 0, 0)),
        KeepAlive => (Control, (2, 0, 0)),
        KeepAliveTimeoutSet => (Control, (3, 0, 0)),
        SwVersionAnnounce => (Control, (4, 0, 0)),
        QueryStreamInfo => (Control, (5, 0, 0)),
        QuerySessionStats => (Control, (6, 0, 0)),
        IdentifyDevice => (Control, (7, 1, 0)),
        QueryEos => (Control, (8, 0, 0)),
        QueryNetworkLayerSize => (Control, (9, 0, 0)),
        SetSos => (Control, (11, 0, 0)),
        SetEos => (Control, (12, 0, 0)),
        SetWriteLen => (Control, (13, 0, 0)),
        SetEncoderParams => (Control, (14, 0, 0)),
        SetDecoderParams => (Control, (15, 0, 0)),
        SetScalerParams => (Control, (16, 0, 0)),
        SetAiParams => (Control, (17, 0, 0)),
        SetSequenceChange => (Control, (18, 0, 0)),
        ScalerAllocFrame => (Control, (19, 0, 0)),
        AiAllocFrame => (Control, (20, 0, 0)),
        ClearInstanceBuf => (Control, (21, 0, 0)),
        SetReadConfig => (Control, (22, 0, 0)),
        SetWriteConfig => (Control, (23, 0, 0)),
        QueryInstanceBufInfo(kind) => {
            let sub = match kind {
                WriteAvailable => 0,
                ReadAvailable => 1,
                WriteAvailableBusy => 2,
                ReadAvailableBusy => 3,
                UploadAvailable => 4,
                Acquire => 5,
            };
            (Control, (24, sub, 0))
        },
        ReadInstance => (ReadData, (0, 0, 0)),
        QueryNetworkLayer => (ReadData, (1, 0, 0)),
        WriteInstance => (WriteData, (0, 0, 0)),
    }
}

/// All operations, used to build the reverse lookup table and for property
/// tests. Keep in sync with [`coords_of`].
pub const ALL_OPERATIONS: &[Operation] = &{
    use BufInfoKind::{Acquire, ReadAvailable, ReadAvailableBusy, UploadAvailable, WriteAvailable, WriteAvailableBusy};
    use Operation::{
        AiAllocFrame, ClearInstanceBuf, CloseSession, IdentifyDevice, KeepAlive, KeepAliveTimeoutSet,
        OpenSession, QueryEos, QueryInstanceBufInfo, QueryNetworkLayer, QueryNetworkLayerSize,
        QuerySessionStats, QueryStreamInfo, ReadInstance, ScalerAllocFrame, SetAiParams,
        SetDecoderParams, SetEncoderParams, SetEos, SetReadConfig, SetScalerParams,
        SetSequenceChange, SetSos, SetWriteConfig, SetWriteLen, SwVersionAnnounce, WriteInstance,
    };
    [
        OpenSession,
        CloseSession,
        KeepAlive,
        KeepAliveTimeoutSet,
        SwVersionAnnounce,
        QueryStreamInfo,
        QuerySessionStats,
        IdentifyDevice,
        QueryEos,
        QueryNetworkLayerSize,
        QueryNetworkLayer,
        SetSos,
        SetEos,
        SetWriteLen,
        SetEncoderParams,
        SetDecoderParams,
        SetScalerParams,
        SetAiParams,
        SetSequenceChange,
        ScalerAllocFrame,
        AiAllocFrame,
        ReadInstance,
        WriteInstance,
        ClearInstanceBuf,
        SetReadConfig,
        SetWriteConfig,
        QueryInstanceBufInfo(WriteAvailable),
        QueryInstanceBufInfo(ReadAvailable),
        QueryInstanceBufInfo(WriteAvailableBusy),
        QueryInstanceBufInfo(ReadAvailableBusy),
        QueryInstanceBufInfo(UploadAvailable),
        QueryInstanceBufInfo(Acquire),
    ]
};

/// The pieces of a decoded LBA: the operation plus the routing fields that
/// are orthogonal to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// The operation this LBA addresses.
    pub operation: Operation,
    /// 7-bit wire session id (see [`WIRE_SESSION_UNASSIGNED`]).
    pub session_id: u8,
    /// `instance_type` bit (selects between an accelerator's dual instances,
    /// e.g. two decode engines behind one `hw_channel`).
    pub instance_type: bool,
    /// 6-bit sub-engine selector.
    pub hw_channel: u8,
}

/// Build the LBA for `operation`, scoped to `session_id` / `instance_type` /
/// `hw_channel`.
///
/// Pure and allocation-free (C1). `session_id` is masked to 7 bits; pass
/// [`WIRE_SESSION_UNASSIGNED`] for device-global operations issued before a
/// session exists.
#[must_use]
pub fn encode(operation: Operation, session_id: u8, instance_type: bool, hw_channel: u8) -> u32 {
    let (direction, (opcode_index, subtype, subsubtype)) = coords_of(operation);

    let mut lba = 0u32;
    lba |= (u32::from(hw_channel) & HW_CHANNEL_MASK) << HW_CHANNEL_SHIFT;
    lba |= (u32::from(session_id) & SESSION_ID_MASK) << SESSION_ID_SHIFT;
    lba |= u32::from(instance_type) << INSTANCE_TYPE_SHIFT;
    lba |= (direction.window_sel() & WINDOW_SEL_MASK) << WINDOW_SEL_SHIFT;
    lba |= (opcode_index & OPCODE_INDEX_MASK) << OPCODE_INDEX_SHIFT;
    lba |= (subtype & SUBTYPE_MASK) << SUBTYPE_SHIFT;
    lba |= subsubtype & SUBSUBTYPE_MASK;
    lba
}

/// Reconstruct `(operation, session_id, instance_type, hw_channel)` from an
/// LBA. Used both by the session layer, and — per §4.1 — for diagnostic
/// logging when a command fails: the raw LBA alone is otherwise opaque.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownLba`] if the window/opcode/subtype
/// combination does not match any entry in [`ALL_OPERATIONS`].
pub fn decode(lba: u32) -> Result<Decoded> {
    let hw_channel = ((lba >> HW_CHANNEL_SHIFT) & HW_CHANNEL_MASK) as u8;
    let session_id = ((lba >> SESSION_ID_SHIFT) & SESSION_ID_MASK) as u8;
    let instance_type = ((lba >> INSTANCE_TYPE_SHIFT) & 1) != 0;
    let window_sel = (lba >> WINDOW_SEL_SHIFT) & WINDOW_SEL_MASK;
    let opcode_index = (lba >> OPCODE_INDEX_SHIFT) & OPCODE_INDEX_MASK;
    let subtype = (lba >> SUBTYPE_SHIFT) & SUBTYPE_MASK;
    let subsubtype = lba & SUBSUBTYPE_MASK;

    let direction = Direction::from_window_sel(window_sel).ok_or(ProtocolError::UnknownLba(lba))?;

    let operation = ALL_OPERATIONS
        .iter()
        .copied()
        .find(|&op| coords_of(op) == (direction, (opcode_index, subtype, subsubtype)))
        .ok_or(ProtocolError::UnknownLba(lba))?;

    Ok(Decoded { operation, session_id, instance_type, hw_channel })
}
