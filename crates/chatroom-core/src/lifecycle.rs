//! Room lifecycle manager.
//!
//! Serializes attach, detach and release through one [`OperationQueue`] and
//! keeps the room status in step with the channel.
//!
//! # Event ordering
//!
//! Channel state changes are consumed by a single handler task. After each
//! channel call, an operation flushes the handler: it waits until every
//! change already broadcast has been processed. Because the channel
//! broadcasts the change caused by `attach()`/`detach()` before the call
//! resolves, the handler always sees that change with the flags as they were
//! before the operation updates them. This is what keeps the first attach,
//! and a re-attach after an explicit detach, from reporting a discontinuity.
//!
//! # Status mapping
//!
//! While an operation is queued or running the handler does not map channel
//! states to room statuses; the operation owns the status. Discontinuity
//! detection is independent of that and runs for every change.

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    channel::{Channel, ChannelState, ChannelStateChange},
    discontinuity::DiscontinuityEmitter,
    env::Environment,
    error::ChatError,
    feature::RoomFeature,
    queue::{OperationPriority, OperationQueue, QueueMonitor},
    status::{RoomStatus, StatusManager},
};

/// Delay between detach attempts while releasing.
pub const RELEASE_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    has_attached_once: bool,
    explicitly_detached: bool,
}

type FlushAck = oneshot::Sender<()>;

struct Inner<E: Environment> {
    env: E,
    room: String,
    channel: Arc<dyn Channel>,
    status: Arc<StatusManager>,
    discontinuity: Arc<DiscontinuityEmitter>,
    features: Mutex<Vec<Arc<dyn RoomFeature>>>,
    flags: Mutex<Flags>,
    flush_tx: mpsc::UnboundedSender<FlushAck>,
}

impl<E: Environment> Inner<E> {
    /// Wait until the handler has processed every change broadcast so far.
    async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.flush_tx.send(ack).is_ok() {
            let _ = done.await;
        }
    }

    fn on_channel_change(&self, change: &ChannelStateChange, monitor: &QueueMonitor) {
        tracing::debug!(
            room = %self.room,
            previous = ?change.previous,
            current = ?change.current,
            resumed = change.resumed,
            "channel state change"
        );

        if change.current == ChannelState::Attached && !change.resumed {
            let flags = *self.flags.lock();
            if flags.has_attached_once && !flags.explicitly_detached {
                self.discontinuity.emit(change.reason.clone());
            }
        }

        if change.is_update() {
            return;
        }

        if !monitor.is_idle() {
            tracing::trace!(room = %self.room, "operation in progress, status mapping suppressed");
            return;
        }

        if self.status.status().is_releasing_or_released() {
            return;
        }

        self.status.set_status_with_retry(
            RoomStatus::from(change.current),
            change.reason.clone(),
            change.retry_in,
        );
    }

    async fn attach(&self) -> Result<(), ChatError> {
        match self.status.status() {
            RoomStatus::Attached => return Ok(()),
            RoomStatus::Released => return Err(ChatError::RoomIsReleased),
            RoomStatus::Releasing => return Err(ChatError::RoomIsReleasing),
            _ => {},
        }

        self.status.set_status(RoomStatus::Attaching, None);
        let result = self.channel.attach().await;
        self.flush().await;

        match result {
            Ok(()) => {
                {
                    let mut flags = self.flags.lock();
                    flags.has_attached_once = true;
                    flags.explicitly_detached = false;
                }
                self.status.set_status(RoomStatus::Attached, None);
                tracing::info!(room = %self.room, "room attached");
                Ok(())
            },
            Err(reason) => {
                let status = RoomStatus::from(self.channel.state());
                tracing::warn!(room = %self.room, %reason, %status, "room attach failed");
                self.status.set_status(status, Some(reason.clone()));
                Err(ChatError::channel(format!("failed to attach room {}", self.room), reason))
            },
        }
    }

    async fn detach(&self) -> Result<(), ChatError> {
        match self.status.status() {
            RoomStatus::Failed => return Err(ChatError::RoomInFailedState),
            RoomStatus::Released => return Err(ChatError::RoomIsReleased),
            RoomStatus::Releasing => return Err(ChatError::RoomIsReleasing),
            RoomStatus::Detached => return Ok(()),
            _ => {},
        }

        self.status.set_status(RoomStatus::Detaching, None);
        let result = self.channel.detach().await;
        self.flush().await;

        match result {
            Ok(()) => {
                self.flags.lock().explicitly_detached = true;
                self.status.set_status(RoomStatus::Detached, None);
                tracing::info!(room = %self.room, "room detached");
                Ok(())
            },
            Err(reason) => {
                let status = RoomStatus::from(self.channel.state());
                tracing::warn!(room = %self.room, %reason, %status, "room detach failed");
                self.status.set_status(status, Some(reason.clone()));
                Err(ChatError::channel(format!("failed to detach room {}", self.room), reason))
            },
        }
    }

    async fn release(&self) {
        match self.status.status() {
            RoomStatus::Released => return,
            RoomStatus::Initialized | RoomStatus::Detached => {
                self.finish_release();
                return;
            },
            _ => {},
        }

        self.status.set_status(RoomStatus::Releasing, None);

        let mut attempts = 0u32;
        loop {
            if self.channel.state() == ChannelState::Failed {
                tracing::debug!(room = %self.room, "channel failed, skipping detach");
                break;
            }

            attempts += 1;
            match self.channel.detach().await {
                Ok(()) => break,
                Err(error) => {
                    if self.channel.state() == ChannelState::Failed {
                        break;
                    }
                    tracing::warn!(
                        room = %self.room,
                        %error,
                        attempts,
                        "detach during release failed, retrying"
                    );
                    self.env.sleep(RELEASE_RETRY_DELAY).await;
                },
            }
        }

        self.flush().await;
        self.finish_release();
    }

    fn finish_release(&self) {
        self.channel.release();

        let features = std::mem::take(&mut *self.features.lock());
        for feature in features {
            tracing::debug!(
                room = %self.room,
                feature = feature.feature_name(),
                "disposing feature"
            );
            feature.dispose();
        }

        self.discontinuity.off_all();
        self.status.set_status(RoomStatus::Released, None);
        tracing::info!(room = %self.room, "room released");
    }
}

async fn run_event_handler<E: Environment>(
    inner: Arc<Inner<E>>,
    monitor: QueueMonitor,
    mut changes: broadcast::Receiver<ChannelStateChange>,
    mut flushes: mpsc::UnboundedReceiver<FlushAck>,
) {
    loop {
        tokio::select! {
            biased;

            received = changes.recv() => match received {
                Ok(change) => inner.on_channel_change(&change, &monitor),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(room = %inner.room, skipped, "channel state changes lagged");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(ack) = flushes.recv() => {
                loop {
                    match changes.try_recv() {
                        Ok(change) => inner.on_channel_change(&change, &monitor),
                        Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                room = %inner.room,
                                skipped,
                                "channel state changes lagged"
                            );
                        },
                        Err(_) => break,
                    }
                }
                let _ = ack.send(());
            },
        }
    }
    tracing::debug!(room = %inner.room, "channel state stream closed");
}

/// Drives the room's channel and status through attach, detach and release.
///
/// Must be created inside a tokio runtime.
pub struct RoomLifecycleManager<E: Environment> {
    inner: Arc<Inner<E>>,
    queue: OperationQueue,
    handler: JoinHandle<()>,
}

impl<E: Environment> RoomLifecycleManager<E> {
    /// Create a manager for `channel`, reporting through `status` and
    /// `discontinuity`.
    pub fn new(
        env: E,
        room: impl Into<String>,
        channel: Arc<dyn Channel>,
        status: Arc<StatusManager>,
        discontinuity: Arc<DiscontinuityEmitter>,
    ) -> Self {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let changes = channel.on_state_change();

        let inner = Arc::new(Inner {
            env,
            room: room.into(),
            channel,
            status,
            discontinuity,
            features: Mutex::new(Vec::new()),
            flags: Mutex::new(Flags::default()),
            flush_tx,
        });

        let queue = OperationQueue::new();
        let handler =
            tokio::spawn(run_event_handler(Arc::clone(&inner), queue.monitor(), changes, flush_rx));

        Self { inner, queue, handler }
    }

    /// Add a feature to dispose on release. Features are disposed in
    /// registration order.
    pub fn register_feature(&self, feature: Arc<dyn RoomFeature>) {
        self.inner.features.lock().push(feature);
    }

    /// Attach the room.
    pub async fn attach(&self) -> Result<(), ChatError> {
        let inner = Arc::clone(&self.inner);
        self.queue
            .submit(OperationPriority::AttachOrDetach, async move { inner.attach().await })
            .await?
    }

    /// Detach the room.
    pub async fn detach(&self) -> Result<(), ChatError> {
        let inner = Arc::clone(&self.inner);
        self.queue
            .submit(OperationPriority::AttachOrDetach, async move { inner.detach().await })
            .await?
    }

    /// Release the room. Never fails; a second call is a no-op.
    pub async fn release(&self) {
        let inner = Arc::clone(&self.inner);
        let released =
            self.queue.submit(OperationPriority::Release, async move { inner.release().await });
        if let Err(error) = released.await {
            tracing::error!(room = %self.inner.room, %error, "release operation lost");
        }
    }

    /// Whether no lifecycle operation is queued or running.
    pub fn is_idle(&self) -> bool {
        self.queue.is_idle()
    }

    /// Number of features still awaiting disposal.
    pub fn feature_count(&self) -> usize {
        self.inner.features.lock().len()
    }
}

impl<E: Environment> Drop for RoomLifecycleManager<E> {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

impl<E: Environment> fmt::Debug for RoomLifecycleManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = *self.inner.flags.lock();
        f.debug_struct("RoomLifecycleManager")
            .field("room", &self.inner.room)
            .field("status", &self.inner.status.status())
            .field("has_attached_once", &flags.has_attached_once)
            .field("explicitly_detached", &flags.explicitly_detached)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
