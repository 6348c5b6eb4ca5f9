//! "Latest ticket wins" executor.
//!
//! Each call to [`LatestJobExecutor::run`] takes a ticket, then waits for the
//! mutex. Once it holds the mutex it runs its job only if no newer call has
//! taken a ticket in the meantime; otherwise it completes as a no-op. Under
//! rapid repeated calls the final state is decided by the last call, and
//! superseded calls never reach the network.

use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::Mutex;

/// Serializes jobs, skipping those superseded before they start.
#[derive(Debug, Default)]
pub struct LatestJobExecutor {
    latest: AtomicU64,
    lock: Mutex<()>,
}

impl LatestJobExecutor {
    /// Create an executor with no issued tickets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` unless a newer call supersedes it before it acquires the
    /// mutex.
    ///
    /// Returns `None` when the call was superseded.
    pub async fn run<F, Fut>(&self, job: F) -> Option<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = self.lock.lock().await;

        if self.latest.load(Ordering::SeqCst) != ticket {
            tracing::trace!(ticket, "job superseded");
            return None;
        }

        Some(job().await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test]
    async fn single_call_runs() {
        let executor = LatestJobExecutor::new();
        let result = executor.run(|| async { 42 }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn sequential_calls_all_run() {
        let executor = LatestJobExecutor::new();
        assert_eq!(executor.run(|| async { 1 }).await, Some(1));
        assert_eq!(executor.run(|| async { 2 }).await, Some(2));
    }

    #[tokio::test]
    async fn waiting_call_superseded_by_newer_one() {
        let executor = LatestJobExecutor::new();
        let executed = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first = {
            let executed = Arc::clone(&executed);
            executor.run(move || async move {
                let _ = release_rx.await;
                executed.fetch_add(1, Ordering::SeqCst);
                "first"
            })
        };
        let second = {
            let executed = Arc::clone(&executed);
            executor.run(move || async move {
                executed.fetch_add(1, Ordering::SeqCst);
                "second"
            })
        };
        let third = {
            let executed = Arc::clone(&executed);
            executor.run(move || async move {
                executed.fetch_add(1, Ordering::SeqCst);
                "third"
            })
        };
        let release = async move {
            tokio::task::yield_now().await;
            let _ = release_tx.send(());
        };

        let (a, b, c, ()) = tokio::join!(first, second, third, release);

        assert_eq!(a, Some("first"));
        assert_eq!(b, None, "second was superseded while waiting");
        assert_eq!(c, Some("third"));
        assert_eq!(executed.load(Ordering::SeqCst), 2);
    }
}
