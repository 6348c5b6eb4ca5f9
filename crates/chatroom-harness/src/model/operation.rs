//! Operations for model-based testing.
//!
//! Operations are everything that can happen to a room: calls made by the
//! application, failures scripted into the channel, and state changes the
//! service pushes. They are generated randomly by proptest (or decoded by the
//! fuzzer) and applied to both the model and the real room.

use arbitrary::Arbitrary;
use chatroom_core::{ChannelState, ChatError};

/// Where a scripted channel failure leaves the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum FailureKind {
    /// Back in the state the call started from.
    InPlace,
    /// Suspended; the channel would retry on its own.
    Suspended,
    /// Failed; only an explicit attach recovers.
    Failed,
}

impl FailureKind {
    /// Channel state after the failure, given the state the call started in.
    pub fn resulting(self, start: ChannelState) -> ChannelState {
        match self {
            Self::InPlace => start,
            Self::Suspended => ChannelState::Suspended,
            Self::Failed => ChannelState::Failed,
        }
    }
}

/// Operations that can be applied to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Application attaches the room.
    Attach,

    /// Application detaches the room.
    Detach,

    /// Application releases the room.
    Release,

    /// The next channel attach fails.
    FailNextAttach {
        /// Channel state left behind.
        kind: FailureKind,
    },

    /// The next channel detach fails.
    FailNextDetach {
        /// Channel state left behind.
        kind: FailureKind,
    },

    /// Service suspends the channel.
    ChannelSuspended,

    /// Service re-attaches the channel.
    ChannelReattach {
        /// Whether message continuity was preserved.
        resumed: bool,
    },

    /// Service fails the channel.
    ChannelFailed,

    /// Advance simulation time.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation succeeded.
    Ok,

    /// Operation failed with an expected error.
    Error(OperationError),
}

/// Errors a room operation can end in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Room is released.
    RoomIsReleased,

    /// Room is being released.
    RoomIsReleasing,

    /// Detach on a failed room.
    RoomInFailedState,

    /// The channel call failed.
    ChannelFailure,

    /// Anything the model never produces.
    Unexpected(String),
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Check if operation failed.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}

impl From<Result<(), ChatError>> for OperationResult {
    fn from(result: Result<(), ChatError>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(error) => Self::Error(OperationError::from(error)),
        }
    }
}

impl From<ChatError> for OperationError {
    fn from(error: ChatError) -> Self {
        match error {
            ChatError::RoomIsReleased => Self::RoomIsReleased,
            ChatError::RoomIsReleasing => Self::RoomIsReleasing,
            ChatError::RoomInFailedState => Self::RoomInFailedState,
            ChatError::Channel { .. } => Self::ChannelFailure,
            other => Self::Unexpected(other.to_string()),
        }
    }
}
