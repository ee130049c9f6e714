//! Session lifecycle states shared by all five session types (§4.5).

use thiserror::Error;

/// Lifecycle state of a session (§4.5.1-4.5.5). Not every state applies to
/// every device type — the decoder is the only one with a `Flushed` state
/// distinct from `Draining`; other sessions collapse `Draining` directly
/// into `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Session id allocated, not yet configured.
    Opened,
    /// Configuration parameters accepted.
    Configured,
    /// Actively reading/writing frames or packets.
    Streaming,
    /// EOS observed on the write side; draining remaining output.
    Draining,
    /// Drain complete; no further reads will yield data (decoder only).
    Flushed,
    /// Session closed; context invalidated.
    Closed,
}

/// A session method was called while the session was in a state that
/// doesn't permit it (e.g. `write` before `configure`).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation not valid in state {state:?}")]
pub struct InvalidStateError {
    /// The state the session was actually in.
    pub state: SessionState,
}

impl SessionState {
    /// Validate that the session is in (one of) the expected state(s),
    /// returning [`InvalidStateError`] otherwise.
    pub fn expect(self, allowed: &[SessionState]) -> Result<(), InvalidStateError> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(InvalidStateError { state: self })
        }
    }
}
