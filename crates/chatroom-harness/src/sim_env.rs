//! Simulation environment.
//!
//! Time comes from the tokio clock, which is virtual both under turmoil and
//! under a paused test runtime. Randomness comes from a seeded ChaCha RNG
//! shared by every clone, so a run is reproducible from its seed.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use chatroom_core::Environment;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seed used by [`SimEnv::new`].
pub const DEFAULT_SEED: u64 = 0x00C0_FFEE;

/// Deterministic environment for simulations and tests.
#[derive(Clone)]
pub struct SimEnv {
    seed: u64,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl SimEnv {
    /// Environment seeded with [`DEFAULT_SEED`].
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Environment seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self { seed, rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))) }
    }

    /// Seed this environment was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Next random `u64`.
    pub fn random_u64(&self) -> u64 {
        self.rng.lock().r#gen()
    }

    /// `true` with probability `p` (clamped to `[0, 1]`).
    pub fn chance(&self, p: f64) -> bool {
        self.rng.lock().gen_bool(p.clamp(0.0, 1.0))
    }

    /// Uniform duration in `[0, max]`.
    pub fn jitter(&self, max: Duration) -> Duration {
        let millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.rng.lock().gen_range(0..=millis))
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEnv").field("seed", &self.seed).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
