//! The status-oracle payload (C3): the accelerator's answer to a
//! query-session-stats read, paired with every command before the caller
//! observes a result (§8, property 1).

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Size in bytes of the session stats payload.
pub const SESSION_STATS_SIZE: usize = 32;

/// The closed set of error codes the accelerator reports in `last_err`
/// (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastError {
    /// No error; the command completed normally.
    Success,
    /// Argument or configuration outside the contract.
    InvalidParam,
    /// Session id was `0xFFFF`, the session timestamp diverged, or close
    /// was already issued for this context.
    InvalidSession,
    /// A page-aligned allocation failed.
    MemAlloc,
    /// The transport read/write itself returned negative.
    NvmeCmdFailed,
    /// Firmware is older than the minimum required for the requested
    /// feature.
    ErrorUnsupportedFwVersion,
    /// The device requires a caller-driven reset; every in-flight session
    /// must be torn down.
    VpuRecovery,
    /// The accelerator's write buffer did not free in time. Non-fatal;
    /// the caller may retry.
    WriteBufferFull,
    /// An accelerator-reported code outside the known taxonomy.
    Unknown(u16),
}

impl LastError {
    fn from_wire(code: u16) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::InvalidParam,
            2 => Self::InvalidSession,
            3 => Self::MemAlloc,
            4 => Self::NvmeCmdFailed,
            5 => Self::ErrorUnsupportedFwVersion,
            6 => Self::VpuRecovery,
            7 => Self::WriteBufferFull,
            other => Self::Unknown(other),
        }
    }

    /// Whether this code represents a persistent failure the keep-alive
    /// task should count, as opposed to a transient or recoverable one.
    ///
    /// [`Self::VpuRecovery`] is propagated to the foreground caller but
    /// must not be treated as a keep-alive failure (§7, propagation
    /// policy).
    #[must_use]
    pub fn is_keepalive_failure(self) -> bool {
        !matches!(self, Self::Success | Self::VpuRecovery | Self::WriteBufferFull)
    }
}

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct RawSessionStats {
    session_id: [u8; 2],
    reserved0: [u8; 2],
    err_count: [u8; 4],
    last_tx_id: [u8; 4],
    last_rc: [u8; 4],
    last_err_tx_id: [u8; 4],
    last_err: [u8; 2],
    reserved1: [u8; 2],
    session_timestamp: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<RawSessionStats>() == SESSION_STATS_SIZE);

/// Parsed session stats, the basis for the status oracle and error
/// classifier (C3/C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Session id this status applies to.
    pub session_id: u16,
    /// Cumulative error count observed by the accelerator for this
    /// session.
    pub err_count: u32,
    /// Transaction id of the most recently completed command.
    pub last_tx_id: u32,
    /// Raw return code of the most recently completed command.
    pub last_rc: u32,
    /// Transaction id of the most recent command that failed.
    pub last_err_tx_id: u32,
    /// Most recent error code.
    pub last_err: LastError,
    /// Opaque session timestamp, used to detect session identity drift.
    pub session_timestamp: u64,
}

impl SessionStats {
    /// Parse a session stats payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::BufferTooShort`] if fewer than
    /// [`SESSION_STATS_SIZE`] bytes are provided.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SESSION_STATS_SIZE {
            return Err(ProtocolError::BufferTooShort { expected: SESSION_STATS_SIZE, actual: bytes.len() });
        }
        let raw = RawSessionStats::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::BufferTooShort { expected: SESSION_STATS_SIZE, actual: bytes.len() })?
            .0;

        Ok(Self {
            session_id: u16::from_be_bytes(raw.session_id),
            err_count: u32::from_be_bytes(raw.err_count),
            last_tx_id: u32::from_be_bytes(raw.last_tx_id),
            last_rc: u32::from_be_bytes(raw.last_rc),
            last_err_tx_id: u32::from_be_bytes(raw.last_err_tx_id),
            last_err: LastError::from_wire(u16::from_be_bytes(raw.last_err)),
            session_timestamp: u64::from_be_bytes(raw.session_timestamp),
        })
    }

    /// The sentinel session id meaning "closed" (`InvalidSession`, §7).
    pub const CLOSED_SESSION_ID: u16 = 0xFFFF;

    /// Whether this status indicates the session has been (or must be
    /// treated as) closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.session_id == Self::CLOSED_SESSION_ID || matches!(self.last_err, LastError::InvalidSession)
    }
}
