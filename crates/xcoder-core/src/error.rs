//! The error taxonomy surfaced to callers (§7).
//!
//! We avoid `std::io::Error` for session-level logic so that transport
//! failures, accelerator-reported failures, and parameter-validation
//! failures stay distinguishable down to the call site.

use std::io;

use thiserror::Error;
use xcoder_proto::ProtocolError;

use crate::validate::ParamErrorCode;

/// Errors surfaced from session operations (open, configure, write, read,
/// close).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XcoderError {
    /// Argument or configuration outside the contract.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Session id was `0xFFFF`, the session timestamp diverged, or close
    /// was already issued for this context.
    #[error("invalid session")]
    InvalidSession,

    /// A page-aligned allocation failed.
    #[error("allocation failed: {0}")]
    MemAlloc(String),

    /// The block device read/write itself failed.
    #[error("nvme command failed: {0}")]
    NvmeCmdFailed(String),

    /// Firmware is older than required for the requested feature.
    #[error("unsupported firmware version: requires >= {required:#x}, device reports {actual:#x}")]
    ErrorUnsupportedFwVersion {
        /// Minimum firmware revision the feature requires.
        required: u32,
        /// Firmware revision the device reported.
        actual: u32,
    },

    /// The device requires a caller-driven reset. Every in-flight session
    /// must be torn down.
    #[error("device requires vpu recovery")]
    VpuRecovery,

    /// The accelerator's write buffer did not free in time. Non-fatal; the
    /// caller may retry.
    #[error("write buffer full")]
    WriteBufferFull,

    /// A transient accelerator failure below the persistent-failure
    /// threshold (§4.3's `XCODER_FAILURES_MAX`). The caller may retry the
    /// command; enough consecutive `Retry` classifications escalate to a
    /// fatal one.
    #[error("transient failure, retry")]
    Retry,

    /// Not enough look-ahead has been buffered yet to emit a frame
    /// (`dts_fifo` below `pic_reorder_delay + 1`, §4.5.1 step 5). Distinct
    /// from [`Self::WriteBufferFull`]: this is a decode-side reorder-delay
    /// condition, not an accelerator write-buffer status.
    #[error("not enough look-ahead buffered to read a frame yet")]
    NotEnoughLookahead,

    /// A numbered subset of validator failures (§4.9).
    #[error("parameter error {code:?}: {message}")]
    ParamError {
        /// Which of the closed set of validator error codes fired.
        code: ParamErrorCode,
        /// Free-form message describing the failure.
        message: String,
    },

    /// The validator repaired the input and wants to inform the caller.
    #[error("parameter warning: {0}")]
    ParamWarn(String),

    /// Wire-level decode/encode failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Underlying block device I/O failure.
    #[error("block device error: {0}")]
    Io(String),
}

impl XcoderError {
    /// Whether this error should be treated as a persistent keep-alive
    /// failure (§7, propagation policy): `VpuRecovery`, `WriteBufferFull`,
    /// and `Retry` are excluded because the keep-alive task must not count
    /// transient or recoverable conditions as session death.
    #[must_use]
    pub fn is_keepalive_failure(&self) -> bool {
        !matches!(self, Self::VpuRecovery | Self::WriteBufferFull | Self::Retry)
    }

    /// Whether no further I/O should be attempted for this context.
    ///
    /// Once `InvalidSession` is declared, the context is dead (§7).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InvalidSession)
    }
}

impl From<io::Error> for XcoderError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vpu_recovery_is_not_a_keepalive_failure() {
        assert!(!XcoderError::VpuRecovery.is_keepalive_failure());
    }

    #[test]
    fn write_buffer_full_is_not_a_keepalive_failure() {
        assert!(!XcoderError::WriteBufferFull.is_keepalive_failure());
    }

    #[test]
    fn nvme_cmd_failed_is_a_keepalive_failure() {
        assert!(XcoderError::NvmeCmdFailed("transport reset".into()).is_keepalive_failure());
    }

    #[test]
    fn retry_is_not_a_keepalive_failure() {
        assert!(!XcoderError::Retry.is_keepalive_failure());
    }

    #[test]
    fn only_invalid_session_is_terminal() {
        assert!(XcoderError::InvalidSession.is_terminal());
        assert!(!XcoderError::VpuRecovery.is_terminal());
    }
}
