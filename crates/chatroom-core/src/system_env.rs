//! Production Environment implementation using the tokio clock.
//!
//! `SystemEnv` reads time through `tokio::time::Instant`, so it follows the
//! real clock in production and the paused clock under `tokio::test` with
//! `start_paused = true`.

use std::time::{Duration, Instant};

use crate::env::Environment;

/// Production environment backed by the tokio time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
