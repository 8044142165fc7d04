//! Seeded environment.
//!
//! Randomness comes from a ChaCha RNG seeded by the test, and time from
//! tokio's clock, so `#[tokio::test(start_paused = true)]` gives virtual time.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use broker_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Wall clock reading at simulation start (2023-11-14).
pub const SIM_EPOCH_SECS: u64 = 1_700_000_000;

/// Deterministic environment for tests.
///
/// Clones share one RNG stream, so the sequence of bytes handed out is fixed
/// by the seed and the order of calls.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    start: tokio::time::Instant,
}

impl SimEnv {
    /// Environment seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            start: tokio::time::Instant::now(),
        }
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn wall_clock_secs(&self) -> u64 {
        SIM_EPOCH_SECS + (self.now() - self.start).as_secs()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
