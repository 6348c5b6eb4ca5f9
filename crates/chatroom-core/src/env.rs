//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples room logic from the system clock. Typing
//! heartbeats, peer pruning timers and the release retry loop all read time
//! and sleep through it, which enables:
//!
//! - Deterministic Simulation: a paused or simulated clock advances instantly,
//!   so multi-second typing timeouts run in microseconds and reproduce
//!   exactly.
//!
//! - Production Runtime: [`SystemEnv`](crate::SystemEnv) uses the tokio clock
//!   without any change to the room logic.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Isolation: Implementations must not share global state between rooms

use std::time::{Duration, Instant};

/// Abstract environment providing time and sleeping.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. Time monotonicity: `now()` never goes backwards
/// 2. Consistency: a `sleep(d)` started at `t` completes no earlier than a
///    `now()` reading of `t + d`
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: This method MUST return values that never decrease
    ///   within a single execution context.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    ///
    /// Used by timer tasks (typing pruning) and the release retry loop, never
    /// while holding room state locks.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Time elapsed since `earlier`, saturating at zero.
    fn elapsed_since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}
