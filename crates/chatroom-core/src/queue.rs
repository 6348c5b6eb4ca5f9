//! Priority-ordered, single-worker operation queue.
//!
//! Every lifecycle operation on a room runs through one [`OperationQueue`].
//! A single worker task pops jobs one at a time: lowest priority number
//! first, submission order within a priority. A running job is never
//! preempted; a release submitted while an attach is running runs as soon as
//! that attach finishes, ahead of anything else still queued.
//!
//! ```text
//!   enqueue(AttachOrDetach, A) ──┐
//!   enqueue(AttachOrDetach, B) ──┼──► [heap: (prio, seq)] ──► worker ──► A, R, B
//!   enqueue(Release, R)        ──┘
//! ```

use std::{
    cmp::Ordering as CmpOrdering,
    collections::BinaryHeap,
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::{
    sync::{Notify, oneshot},
    task::JoinHandle,
};

use crate::error::ChatError;

/// Priority class of a queued operation. Lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationPriority {
    /// Room release.
    Release = 0,
    /// Room attach or detach.
    AttachOrDetach = 1,
}

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

struct QueuedJob {
    priority: OperationPriority,
    seq: u64,
    job: Job,
}

impl QueuedJob {
    const fn key(&self) -> (OperationPriority, u64) {
        (self.priority, self.seq)
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    // BinaryHeap is a max-heap; the smallest (priority, seq) must pop first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.key().cmp(&self.key())
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
    /// Jobs queued or running.
    outstanding: usize,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Handle to the result of an enqueued operation.
#[derive(Debug)]
pub struct PendingOperation<T> {
    result: oneshot::Receiver<T>,
}

impl<T> PendingOperation<T> {
    /// Wait for the operation to run and return its output.
    pub async fn wait(self) -> Result<T, ChatError> {
        self.result.await.map_err(|_| ChatError::ReleasedBeforeOperationCompleted)
    }
}

/// Read-only view of queue activity.
#[derive(Clone)]
pub struct QueueMonitor {
    shared: Arc<Shared>,
}

impl QueueMonitor {
    /// Whether no operation is queued or running.
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().outstanding == 0
    }

    /// Number of operations queued or running.
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().outstanding
    }
}

impl fmt::Debug for QueueMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMonitor").field("outstanding", &self.outstanding()).finish()
    }
}

/// Serialized operation queue with one worker task.
///
/// Must be created inside a tokio runtime. Dropping the queue stops the
/// worker; operations still queued resolve to
/// [`ChatError::ReleasedBeforeOperationCompleted`].
pub struct OperationQueue {
    shared: Arc<Shared>,
    worker: JoinHandle<()>,
}

impl OperationQueue {
    /// Create the queue and spawn its worker.
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        let worker = tokio::spawn(run_worker(Arc::clone(&shared)));
        Self { shared, worker }
    }

    /// Queue `operation` without waiting for it.
    pub fn enqueue<T, Fut>(
        &self,
        priority: OperationPriority,
        operation: Fut,
    ) -> PendingOperation<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(operation.await);
        });

        {
            let mut state = self.shared.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.outstanding += 1;
            state.heap.push(QueuedJob { priority, seq, job });
        }
        self.shared.notify.notify_one();

        PendingOperation { result: rx }
    }

    /// Queue `operation` and wait for its output.
    pub async fn submit<T, Fut>(
        &self,
        priority: OperationPriority,
        operation: Fut,
    ) -> Result<T, ChatError>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(priority, operation).wait().await
    }

    /// Activity view shared with the channel event handler.
    pub fn monitor(&self) -> QueueMonitor {
        QueueMonitor { shared: Arc::clone(&self.shared) }
    }

    /// Whether no operation is queued or running.
    pub fn is_idle(&self) -> bool {
        self.monitor().is_idle()
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

impl fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("OperationQueue")
            .field("queued", &state.heap.len())
            .field("outstanding", &state.outstanding)
            .finish()
    }
}

async fn run_worker(shared: Arc<Shared>) {
    loop {
        let next = shared.state.lock().heap.pop();

        match next {
            Some(queued) => {
                tracing::trace!(priority = ?queued.priority, seq = queued.seq, "running operation");
                queued.job.await;
                let mut state = shared.state.lock();
                state.outstanding = state.outstanding.saturating_sub(1);
            },
            None => shared.notify.notified().await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn submit_returns_output() {
        let queue = OperationQueue::new();
        let out = queue.submit(OperationPriority::AttachOrDetach, async { 5 }).await;
        assert_eq!(out, Ok(5));
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn release_runs_before_queued_siblings_but_after_running_job() {
        let queue = OperationQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let l = Arc::clone(&log);
        let first = queue.enqueue(OperationPriority::AttachOrDetach, async move {
            let _ = started_tx.send(());
            let _ = gate_rx.await;
            l.lock().push("attach-1");
        });
        started_rx.await.unwrap();

        let l = Arc::clone(&log);
        let second = queue.enqueue(OperationPriority::AttachOrDetach, async move {
            l.lock().push("detach-2");
        });
        let l = Arc::clone(&log);
        let release = queue.enqueue(OperationPriority::Release, async move {
            l.lock().push("release");
        });

        assert_eq!(queue.monitor().outstanding(), 3);
        gate_tx.send(()).unwrap();

        first.wait().await.unwrap();
        release.wait().await.unwrap();
        second.wait().await.unwrap();

        assert_eq!(*log.lock(), vec!["attach-1", "release", "detach-2"]);
    }

    #[tokio::test]
    async fn same_priority_is_fifo() {
        let queue = OperationQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let blocker = queue.enqueue(OperationPriority::AttachOrDetach, async move {
            let _ = started_tx.send(());
            let _ = gate_rx.await;
        });
        started_rx.await.unwrap();

        let pending: Vec<_> = (0..5)
            .map(|i| {
                let l = Arc::clone(&log);
                queue.enqueue(OperationPriority::AttachOrDetach, async move { l.lock().push(i) })
            })
            .collect();

        gate_tx.send(()).unwrap();
        blocker.wait().await.unwrap();
        for p in pending {
            p.wait().await.unwrap();
        }

        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn one_job_runs_at_a_time() {
        let queue = OperationQueue::new();
        let running = Arc::new(Mutex::new(0usize));
        let max_seen = Arc::new(Mutex::new(0usize));

        let pending: Vec<_> = (0..4)
            .map(|i| {
                let running = Arc::clone(&running);
                let max_seen = Arc::clone(&max_seen);
                let priority = if i % 2 == 0 {
                    OperationPriority::AttachOrDetach
                } else {
                    OperationPriority::Release
                };
                queue.enqueue(priority, async move {
                    {
                        let mut r = running.lock();
                        *r += 1;
                        let mut m = max_seen.lock();
                        *m = (*m).max(*r);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    *running.lock() -= 1;
                })
            })
            .collect();

        for p in pending {
            p.wait().await.unwrap();
        }

        assert_eq!(*max_seen.lock(), 1);
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn dropped_queue_fails_pending_operations() {
        let queue = OperationQueue::new();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let _blocker = queue.enqueue(OperationPriority::AttachOrDetach, async move {
            let _ = started_tx.send(());
            std::future::pending::<()>().await;
        });
        started_rx.await.unwrap();

        let queued = queue.enqueue(OperationPriority::AttachOrDetach, async { 1 });
        drop(queue);

        assert_eq!(queued.wait().await, Err(ChatError::ReleasedBeforeOperationCompleted));
    }
}
