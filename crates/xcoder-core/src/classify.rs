//! The error classifier (C4): turns a transport result plus a status-oracle
//! read into the taxonomy callers actually see (§7).
//!
//! The central rule this module exists to enforce: a transport success can
//! still be a session failure. Every command pairs with exactly one
//! status-query read (§8, property 1), and it is that read's `last_err`
//! that is authoritative, not whether the NVMe write itself returned Ok.

use xcoder_proto::stats::{LastError, SessionStats};

use crate::error::XcoderError;

/// Minimum firmware revision required for scaler stack mode (§7 example).
pub const MIN_FW_FOR_SCALER_STACK_MODE: u32 = 0x0040_0000;

/// Running failure count past which a classification that would otherwise
/// be retryable is escalated to a persistent, fatal one (§4.3).
pub const XCODER_FAILURES_MAX: u32 = 25;

/// Classify a status-oracle read into the caller-visible error taxonomy.
///
/// Returns `Ok(stats)` only when `last_err` is [`LastError::Success`].
/// `VpuRecovery` is always propagated, never swallowed (§7). A
/// `write_buffer_full` status is retryable below
/// [`XCODER_FAILURES_MAX`] consecutive failures and escalates to a fatal
/// classification once `stats.err_count` reaches it (§4.3) — every other
/// code is a fixed, always-fatal mapping to the matching [`XcoderError`]
/// variant.
pub fn classify(stats: SessionStats) -> Result<SessionStats, XcoderError> {
    match stats.last_err {
        LastError::Success => Ok(stats),
        LastError::InvalidParam => {
            Err(XcoderError::InvalidParam(format!("accelerator rejected rc={}", stats.last_rc)))
        },
        LastError::InvalidSession => Err(XcoderError::InvalidSession),
        LastError::MemAlloc => Err(XcoderError::MemAlloc("accelerator allocation failed".to_string())),
        LastError::NvmeCmdFailed => {
            Err(XcoderError::NvmeCmdFailed(format!("transaction {} failed", stats.last_err_tx_id)))
        },
        LastError::ErrorUnsupportedFwVersion => Err(XcoderError::ErrorUnsupportedFwVersion {
            required: MIN_FW_FOR_SCALER_STACK_MODE,
            actual: 0,
        }),
        LastError::VpuRecovery => Err(XcoderError::VpuRecovery),
        LastError::WriteBufferFull => {
            if stats.err_count >= XCODER_FAILURES_MAX {
                Err(XcoderError::WriteBufferFull)
            } else {
                Err(XcoderError::Retry)
            }
        },
        LastError::Unknown(code) => {
            Err(XcoderError::NvmeCmdFailed(format!("unrecognized accelerator error code {code}")))
        },
    }
}
