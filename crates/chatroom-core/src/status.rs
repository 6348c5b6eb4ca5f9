//! Room status tracking.
//!
//! [`StatusManager`] is a pure state holder: the current [`RoomStatus`] and
//! the error that accompanied the last transition. It performs no legality
//! checks; the lifecycle manager decides which transitions happen.

use std::{fmt, time::Duration};

use parking_lot::{Mutex, ReentrantMutex};

use crate::{
    channel::ChannelState,
    error::ErrorInfo,
    listeners::{Listeners, Subscription},
};

/// Status of a room.
///
/// Mirrors the underlying channel state plus the SDK-only `Releasing` and
/// `Released` statuses, which only the explicit release path produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomStatus {
    /// Created, never attached.
    Initialized,
    /// Attach in progress.
    Attaching,
    /// Attached and receiving events.
    Attached,
    /// Detach in progress.
    Detaching,
    /// Detached.
    Detached,
    /// Connection interrupted; the channel retries on its own.
    Suspended,
    /// Unrecoverable channel failure.
    Failed,
    /// Release in progress.
    Releasing,
    /// Released. Terminal.
    Released,
}

impl RoomStatus {
    /// Whether no further operation is valid on the room.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Released)
    }

    /// Whether the room is on the release path.
    pub const fn is_releasing_or_released(self) -> bool {
        matches!(self, Self::Releasing | Self::Released)
    }
}

impl From<ChannelState> for RoomStatus {
    fn from(state: ChannelState) -> Self {
        match state {
            ChannelState::Initialized => Self::Initialized,
            ChannelState::Attaching => Self::Attaching,
            ChannelState::Attached => Self::Attached,
            ChannelState::Detaching => Self::Detaching,
            ChannelState::Detached => Self::Detached,
            ChannelState::Suspended => Self::Suspended,
            ChannelState::Failed => Self::Failed,
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "initialized",
            Self::Attaching => "attaching",
            Self::Attached => "attached",
            Self::Detaching => "detaching",
            Self::Detached => "detached",
            Self::Suspended => "suspended",
            Self::Failed => "failed",
            Self::Releasing => "releasing",
            Self::Released => "released",
        };
        f.write_str(name)
    }
}

/// Snapshot of a status transition handed to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatusChange {
    /// New status.
    pub current: RoomStatus,
    /// Status before the transition.
    pub previous: RoomStatus,
    /// Error that caused the transition, if any.
    pub error: Option<ErrorInfo>,
    /// When the channel will retry on its own (suspended rooms).
    pub retry_in: Option<Duration>,
}

#[derive(Debug)]
struct StatusState {
    status: RoomStatus,
    error: Option<ErrorInfo>,
}

/// Holds the current room status and notifies listeners on every change.
pub struct StatusManager {
    state: Mutex<StatusState>,
    /// Serializes update+notify so listeners observe transitions in order.
    emit_order: ReentrantMutex<()>,
    listeners: Listeners<RoomStatusChange>,
}

impl StatusManager {
    /// Create a manager in `Initialized`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StatusState { status: RoomStatus::Initialized, error: None }),
            emit_order: ReentrantMutex::new(()),
            listeners: Listeners::new(),
        }
    }

    /// Current status.
    pub fn status(&self) -> RoomStatus {
        self.state.lock().status
    }

    /// Error from the last transition.
    pub fn error(&self) -> Option<ErrorInfo> {
        self.state.lock().error.clone()
    }

    /// Overwrite status and error, then notify listeners synchronously.
    pub fn set_status(&self, status: RoomStatus, error: Option<ErrorInfo>) {
        self.set_status_with_retry(status, error, None);
    }

    /// As [`StatusManager::set_status`], reporting when the channel retries.
    pub fn set_status_with_retry(
        &self,
        status: RoomStatus,
        error: Option<ErrorInfo>,
        retry_in: Option<Duration>,
    ) {
        let _order = self.emit_order.lock();

        let change = {
            let mut state = self.state.lock();
            let previous = state.status;
            state.status = status;
            state.error.clone_from(&error);
            RoomStatusChange { current: status, previous, error, retry_in }
        };

        tracing::debug!(
            previous = %change.previous,
            current = %change.current,
            "room status change"
        );
        self.listeners.emit(&change);
    }

    /// Register a status listener.
    pub fn on_change(
        &self,
        listener: impl Fn(&RoomStatusChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.add(listener)
    }

    /// Remove every status listener.
    pub fn off_all(&self) {
        self.listeners.clear();
    }
}

impl Default for StatusManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatusManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StatusManager")
            .field("status", &state.status)
            .field("error", &state.error)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
