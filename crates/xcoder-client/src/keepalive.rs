//! The keep-alive task (C5, §4.4): spawned at session open, sends a
//! heartbeat write plus a status-query read every
//! `max(1, session_timeout/3)` and exits on a fatal classification or a
//! cooperative cancellation request.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use xcoder_core::{BlockDevice, Context, Environment, StatusOracle};
use xcoder_proto::{encode, Operation};

/// Upper bound on how long a single cancellation poll waits before
/// re-checking the cancel flag (§4.4: "polls at ≤10 ms granularity").
const CANCEL_POLL_GRANULARITY: Duration = Duration::from_millis(10);

/// Handle to a running keep-alive task. Dropping this handle does not stop
/// the task — call [`KeepAliveHandle::cancel`] for that; cancellation is
/// cooperative, not forced.
pub struct KeepAliveHandle {
    cancel: Arc<AtomicBool>,
    join: tokio::task::JoinHandle<()>,
}

impl KeepAliveHandle {
    /// Request cooperative cancellation and wait for the task to exit.
    pub async fn cancel(self) {
        self.cancel.store(true, Ordering::Release);
        let _ = self.join.await;
    }
}

/// Compute the keep-alive interval from a session timeout, both in
/// microseconds (§4.4: `max(1, session_timeout/3)`).
#[must_use]
pub fn keepalive_interval(session_timeout_us: u64) -> Duration {
    Duration::from_micros((session_timeout_us / 3).max(1))
}

/// Spawn the keep-alive task for `context` on `env`'s executor.
///
/// On every tick, writes the keep-alive LBA using the context's zeroed
/// scratch page, then queries session stats and classifies the result. A
/// fatal classification sets `context.mark_keepalive_failure()` and exits
/// the task; [`XcoderError::VpuRecovery`] and [`XcoderError::WriteBufferFull`]
/// are not counted as fatal (§4.4, §7 propagation policy).
pub fn spawn<E, D>(env: E, device: Arc<D>, context: Arc<Context>, session_timeout_us: u64) -> KeepAliveHandle
where
    E: Environment,
    D: BlockDevice + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_for_task = cancel.clone();
    let interval = keepalive_interval(session_timeout_us);

    let join = tokio::spawn(async move {
        loop {
            if sleep_cancellable(&env, interval, &cancel_for_task).await {
                return;
            }
            if context.is_invalid() {
                return;
            }

            let lba = encode(Operation::KeepAlive, context.wire_session_id(), context.instance_type(), context.hw_channel());
            if device.write_pages(lba, context.zero_page_scratch()).await.is_err() {
                tracing::warn!(session_id = context.session_id(), "keep-alive write failed");
                continue;
            }

            let oracle = StatusOracle::new(device.as_ref());
            match oracle.query_and_record(context.as_ref()).await {
                Ok(_) => {},
                Err(err) if !err.is_keepalive_failure() => {
                    tracing::debug!(session_id = context.session_id(), ?err, "non-fatal keep-alive status");
                },
                Err(err) => {
                    tracing::warn!(session_id = context.session_id(), ?err, "keep-alive observed fatal status");
                    context.mark_keepalive_failure();
                    return;
                },
            }
        }
    });

    KeepAliveHandle { cancel, join }
}

/// Sleep for `duration`, polling `cancel` at [`CANCEL_POLL_GRANULARITY`].
/// Returns `true` if cancellation was observed before the sleep completed.
async fn sleep_cancellable<E: Environment>(env: &E, duration: Duration, cancel: &AtomicBool) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if cancel.load(Ordering::Acquire) {
            return true;
        }
        let step = remaining.min(CANCEL_POLL_GRANULARITY);
        env.sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
    cancel.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_is_a_third_of_timeout() {
        assert_eq!(keepalive_interval(3_000_000), Duration::from_micros(1_000_000));
    }

    #[test]
    fn interval_is_never_zero() {
        assert_eq!(keepalive_interval(0), Duration::from_micros(1));
        assert_eq!(keepalive_interval(2), Duration::from_micros(1));
    }
}
