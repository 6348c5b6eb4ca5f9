//! Contract between the room and its features.
//!
//! Features (messages, presence, typing, reactions, occupancy) are owned by
//! the room and disposed only by the lifecycle manager's final release. They
//! see the room through its [`StatusManager`] and never drive the channel
//! lifecycle themselves.

use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

use crate::{
    error::ChatError,
    status::{RoomStatus, StatusManager},
};

/// A room feature the lifecycle manager disposes on release.
pub trait RoomFeature: Send + Sync {
    /// Name used in logs.
    fn feature_name(&self) -> &'static str;

    /// Stop background tasks and drop listeners. Called exactly once.
    fn dispose(&self);
}

/// Wait until the room is attached.
///
/// Returns immediately when attached, waits for the next transition while
/// attaching, and fails immediately for any other status. A transition out
/// of `Attaching` to anything but `Attached` fails with that status.
pub async fn ensure_attached(status: &StatusManager) -> Result<(), ChatError> {
    match status.status() {
        RoomStatus::Attached => return Ok(()),
        RoomStatus::Attaching => {},
        other => return Err(ChatError::RoomInInvalidState { status: other }),
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = status.on_change(move |change| {
        let _ = tx.send(change.current);
    });

    // Re-check: the transition may have happened before the listener landed.
    let outcome = match status.status() {
        RoomStatus::Attached => Ok(()),
        RoomStatus::Attaching => loop {
            match rx.recv().await {
                Some(RoomStatus::Attaching) => {},
                Some(RoomStatus::Attached) => break Ok(()),
                Some(other) => break Err(ChatError::RoomInInvalidState { status: other }),
                None => break Err(ChatError::ReleasedBeforeOperationCompleted),
            }
        },
        other => Err(ChatError::RoomInInvalidState { status: other }),
    };

    subscription.unsubscribe();
    if let Err(error) = &outcome {
        tracing::debug!(%error, "room did not become attached");
    }
    outcome
}

/// Spawn a task feeding every item of a channel stream to `handle` until the
/// stream closes or the task is aborted.
pub(crate) fn spawn_pump<T, F>(
    feature: &'static str,
    mut rx: broadcast::Receiver<T>,
    mut handle: F,
) -> JoinHandle<()>
where
    T: Clone + Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(item) => handle(item),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(feature, skipped, "inbound stream lagged");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::trace!(feature, "inbound stream closed");
    })
}
