//! Typing indicators.
//!
//! Outbound, the local client sends `typing.started` at most once per
//! heartbeat throttle while keystrokes keep coming, and `typing.stopped` when
//! told to stop. Both calls go through a [`LatestJobExecutor`] so a burst of
//! calls collapses to the last one.
//!
//! Inbound, peers are tracked by a single worker task that owns the pruning
//! timers. A peer that sends no heartbeat for `heartbeat_throttle + timeout`
//! is removed as if it had sent `typing.stopped`.
//!
//! ```text
//!   Started(c) ──► insert c, replace c's timer ──► emit if newly added
//!   Stopped(c) ──► cancel c's timer, remove c  ──► emit if it was present
//!   timer(c)   ──► remove c                    ──► emit synthesized Stopped
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::{
    channel::{Channel, InboundMessage, OutboundMessage},
    config::TypingOptions,
    env::Environment,
    error::ChatError,
    feature::{RoomFeature, ensure_attached},
    listeners::{Listeners, Subscription},
    single_flight::LatestJobExecutor,
    status::StatusManager,
};

/// Channel event name for a typing heartbeat.
pub const TYPING_STARTED: &str = "typing.started";

/// Channel event name for an explicit stop.
pub const TYPING_STOPPED: &str = "typing.stopped";

/// Direction of a typing transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypingEventKind {
    /// Client started typing.
    Started,
    /// Client stopped typing (explicitly or by timeout).
    Stopped,
}

/// One client's typing transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingChange {
    /// Client whose state changed.
    pub client_id: String,
    /// What changed.
    pub kind: TypingEventKind,
}

/// Typing set after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSetEvent {
    /// Everyone typing after the change.
    pub current_typers: HashSet<String>,
    /// The change itself.
    pub change: TypingChange,
}

/// Decode an inbound typing event.
pub fn decode_typing_event(inbound: &InboundMessage) -> Result<TypingChange, ChatError> {
    let kind = match inbound.name.as_str() {
        TYPING_STARTED => TypingEventKind::Started,
        TYPING_STOPPED => TypingEventKind::Stopped,
        other => {
            return Err(ChatError::Decode {
                what: "typing event",
                reason: format!("unexpected event name {other:?}"),
            });
        },
    };

    match inbound.client_id.as_deref() {
        Some(client_id) if !client_id.is_empty() => {
            Ok(TypingChange { client_id: client_id.to_string(), kind })
        },
        _ => Err(ChatError::Decode {
            what: "typing event",
            reason: "missing client id".to_string(),
        }),
    }
}

fn is_typing_event(name: &str) -> bool {
    name == TYPING_STARTED || name == TYPING_STOPPED
}

/// Typing indicators of one room.
pub struct Typing<E: Environment> {
    env: E,
    options: TypingOptions,
    channel: Arc<dyn Channel>,
    status: Arc<StatusManager>,
    executor: LatestJobExecutor,
    heartbeat: Mutex<Option<Instant>>,
    typers: Arc<Mutex<HashSet<String>>>,
    listeners: Listeners<TypingSetEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Environment> Typing<E> {
    /// Wire typing to the room channel and start the inbound worker.
    pub fn new(
        env: E,
        options: TypingOptions,
        channel: Arc<dyn Channel>,
        status: Arc<StatusManager>,
    ) -> Self {
        let typers = Arc::new(Mutex::new(HashSet::new()));
        let listeners = Listeners::new();

        let (worker, expiries) = TypingWorker::new(
            env.clone(),
            options.prune_after(),
            Arc::clone(&typers),
            listeners.clone(),
        );
        let worker = tokio::spawn(worker.run(expiries, channel.subscribe()));

        Self {
            env,
            options,
            channel,
            status,
            executor: LatestJobExecutor::new(),
            heartbeat: Mutex::new(None),
            typers,
            listeners,
            worker: Mutex::new(Some(worker)),
        }
    }

    fn heartbeat_active(&self, last: Instant) -> bool {
        self.env.elapsed_since(last) < self.options.heartbeat_throttle
    }

    /// Signal a keystroke.
    ///
    /// Sends `typing.started` unless a heartbeat was sent within the
    /// throttle. Requires the room to be attached.
    pub async fn keystroke(&self) -> Result<(), ChatError> {
        self.executor.run(|| self.start_heartbeat()).await.unwrap_or(Ok(()))
    }

    /// Signal that the local client stopped typing.
    ///
    /// No-op unless a heartbeat is still active. Requires the room to be
    /// attached.
    pub async fn stop(&self) -> Result<(), ChatError> {
        self.executor.run(|| self.stop_heartbeat()).await.unwrap_or(Ok(()))
    }

    async fn start_heartbeat(&self) -> Result<(), ChatError> {
        let last = *self.heartbeat.lock();
        if last.is_some_and(|last| self.heartbeat_active(last)) {
            tracing::trace!("typing heartbeat throttled");
            return Ok(());
        }

        ensure_attached(&self.status).await?;
        self.channel
            .publish(OutboundMessage::ephemeral(TYPING_STARTED))
            .await
            .map_err(|e| ChatError::channel("failed to publish typing started", e))?;
        *self.heartbeat.lock() = Some(self.env.now());
        Ok(())
    }

    async fn stop_heartbeat(&self) -> Result<(), ChatError> {
        let last = *self.heartbeat.lock();
        if !last.is_some_and(|last| self.heartbeat_active(last)) {
            tracing::trace!("no active typing heartbeat to stop");
            return Ok(());
        }

        ensure_attached(&self.status).await?;
        self.channel
            .publish(OutboundMessage::ephemeral(TYPING_STOPPED))
            .await
            .map_err(|e| ChatError::channel("failed to publish typing stopped", e))?;
        *self.heartbeat.lock() = None;
        Ok(())
    }

    /// Clients currently typing.
    pub fn current(&self) -> HashSet<String> {
        self.typers.lock().clone()
    }

    /// Subscribe to typing set changes.
    pub fn subscribe(
        &self,
        listener: impl Fn(&TypingSetEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.add(listener)
    }

    /// Options in effect.
    pub fn options(&self) -> &TypingOptions {
        &self.options
    }
}

impl<E: Environment> RoomFeature for Typing<E> {
    fn feature_name(&self) -> &'static str {
        "typing"
    }

    fn dispose(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        self.listeners.clear();
        self.typers.lock().clear();
        *self.heartbeat.lock() = None;
    }
}

impl<E: Environment> fmt::Debug for Typing<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Typing")
            .field("options", &self.options)
            .field("typers", &self.typers.lock().len())
            .field("heartbeat", &*self.heartbeat.lock())
            .finish_non_exhaustive()
    }
}

/// Pruning timer for one peer. `generation` distinguishes a timer from the
/// ones that replaced it.
struct PruneTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Owns the typing set mutations and the pruning timers.
struct TypingWorker<E: Environment> {
    env: E,
    prune_after: Duration,
    typers: Arc<Mutex<HashSet<String>>>,
    listeners: Listeners<TypingSetEvent>,
    timers: HashMap<String, PruneTimer>,
    next_generation: u64,
    expiry_tx: mpsc::UnboundedSender<(String, u64)>,
}

type Expiries = mpsc::UnboundedReceiver<(String, u64)>;

impl<E: Environment> TypingWorker<E> {
    fn new(
        env: E,
        prune_after: Duration,
        typers: Arc<Mutex<HashSet<String>>>,
        listeners: Listeners<TypingSetEvent>,
    ) -> (Self, Expiries) {
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();
        let worker = Self {
            env,
            prune_after,
            typers,
            listeners,
            timers: HashMap::new(),
            next_generation: 0,
            expiry_tx,
        };
        (worker, expiry_rx)
    }

    async fn run(
        mut self,
        mut expiries: Expiries,
        mut inbound: broadcast::Receiver<InboundMessage>,
    ) {
        loop {
            tokio::select! {
                Some((client_id, generation)) = expiries.recv() => {
                    self.on_expired(&client_id, generation);
                },
                received = inbound.recv() => match received {
                    Ok(message) if is_typing_event(&message.name) => {
                        match decode_typing_event(&message) {
                            Ok(change) => self.apply(change),
                            Err(error) => {
                                tracing::warn!(%error, "dropping undecodable typing event");
                            },
                        }
                    },
                    Ok(_) => {},
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "typing stream lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    fn apply(&mut self, change: TypingChange) {
        match change.kind {
            TypingEventKind::Started => self.on_started(change.client_id),
            TypingEventKind::Stopped => self.on_stopped(change.client_id),
        }
    }

    fn on_started(&mut self, client_id: String) {
        self.schedule_prune(&client_id);
        let added = self.typers.lock().insert(client_id.clone());
        if added {
            self.emit(client_id, TypingEventKind::Started);
        }
    }

    fn on_stopped(&mut self, client_id: String) {
        if let Some(timer) = self.timers.remove(&client_id) {
            timer.handle.abort();
        }
        let removed = self.typers.lock().remove(&client_id);
        if removed {
            self.emit(client_id, TypingEventKind::Stopped);
        }
    }

    fn on_expired(&mut self, client_id: &str, generation: u64) {
        let current = self.timers.get(client_id).map(|t| t.generation);
        if current != Some(generation) {
            return;
        }
        self.timers.remove(client_id);

        let removed = self.typers.lock().remove(client_id);
        if removed {
            tracing::debug!(client_id, "typing peer timed out");
            self.emit(client_id.to_string(), TypingEventKind::Stopped);
        }
    }

    fn schedule_prune(&mut self, client_id: &str) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let env = self.env.clone();
        let prune_after = self.prune_after;
        let expiry_tx = self.expiry_tx.clone();
        let key = client_id.to_string();
        let handle = tokio::spawn(async move {
            env.sleep(prune_after).await;
            let _ = expiry_tx.send((key, generation));
        });

        if let Some(previous) =
            self.timers.insert(client_id.to_string(), PruneTimer { generation, handle })
        {
            previous.handle.abort();
        }
    }

    fn emit(&self, client_id: String, kind: TypingEventKind) {
        let current_typers = self.typers.lock().clone();
        let change = TypingChange { client_id, kind };
        self.listeners.emit(&TypingSetEvent { current_typers, change });
    }
}

impl<E: Environment> Drop for TypingWorker<E> {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}
