//! A deterministic [`Environment`] for virtual-time tests of the keep-alive
//! task and anything else that schedules against wall-clock time.
//!
//! Time comes from `tokio::time`'s own paused clock (`#[tokio::test(start_paused
//! = true)]` plus [`tokio::time::advance`]) rather than a hand-rolled virtual
//! clock, since that's already the deterministic-time primitive the async
//! runtime this workspace depends on provides. Randomness is a seeded linear
//! congruential generator so a failing test can be reproduced by pinning the
//! seed.

use std::sync::Mutex;
use std::time::Duration;

use xcoder_core::env::Environment;

/// Numerical-Recipes LCG constants: `state' = A * state + C (mod 2^32)`.
const LCG_A: u64 = 1_664_525;
const LCG_C: u64 = 1_013_904_223;
const LCG_M: u64 = 1 << 32;

/// A minimal seeded PRNG, deterministic given the same seed and call order.
///
/// Not suitable for anything security-sensitive; this type only ever backs
/// test code.
#[derive(Debug)]
struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed % LCG_M }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = (LCG_A.wrapping_mul(self.state).wrapping_add(LCG_C)) % LCG_M;
        #[allow(clippy::cast_possible_truncation)]
        let value = self.state as u32;
        value
    }
}

/// Deterministic, virtual-time [`Environment`] for scenario and property
/// tests (§8).
///
/// Cloning shares the same underlying RNG state, matching the contract
/// [`Environment`] imposes on `Clone` implementations (every clone observes
/// the same sequence once the runtime advances time or draws bytes).
#[derive(Debug, Clone)]
pub struct SimEnv {
    rng: std::sync::Arc<Mutex<Lcg>>,
}

impl SimEnv {
    /// Construct a new simulated environment seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { rng: std::sync::Arc::new(Mutex::new(Lcg::new(seed))) }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        let mut rng = self.rng.lock().expect("sim env rng mutex poisoned");
        for chunk in buffer.chunks_mut(4) {
            let word = rng.next_u32().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}
