//! Model room: the reference lifecycle.
//!
//! Operations apply atomically and synchronously. The model tracks the
//! channel state the scripted channel would be in, so it can tell which
//! state changes the real room observes, and decides status, errors and
//! discontinuities from that.

use std::collections::VecDeque;

use chatroom_core::{ChannelState, RoomStatus};

use super::operation::{FailureKind, Operation, OperationError, OperationResult};

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Room status.
    pub status: RoomStatus,
    /// Channel state.
    pub channel: ChannelState,
    /// Discontinuities reported to the application.
    pub discontinuities: usize,
    /// Whether the room's features were disposed.
    pub disposed: bool,
}

/// Reference implementation of one room's lifecycle.
#[derive(Debug, Clone)]
pub struct ModelRoom {
    status: RoomStatus,
    channel: ChannelState,
    has_attached_once: bool,
    explicitly_detached: bool,
    discontinuities: usize,
    disposed: bool,
    attach_failures: VecDeque<FailureKind>,
    detach_failures: VecDeque<FailureKind>,
}

impl ModelRoom {
    /// Fresh room over a fresh channel.
    pub fn new() -> Self {
        Self {
            status: RoomStatus::Initialized,
            channel: ChannelState::Initialized,
            has_attached_once: false,
            explicitly_detached: false,
            discontinuities: 0,
            disposed: false,
            attach_failures: VecDeque::new(),
            detach_failures: VecDeque::new(),
        }
    }

    /// Current status.
    pub fn status(&self) -> RoomStatus {
        self.status
    }

    /// Apply an operation and return the result the real room must match.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match *op {
            Operation::Attach => self.apply_attach(),
            Operation::Detach => self.apply_detach(),
            Operation::Release => {
                self.apply_release();
                OperationResult::Ok
            },
            Operation::FailNextAttach { kind } => {
                self.attach_failures.push_back(kind);
                OperationResult::Ok
            },
            Operation::FailNextDetach { kind } => {
                self.detach_failures.push_back(kind);
                OperationResult::Ok
            },
            Operation::ChannelSuspended => {
                self.server_change(ChannelState::Suspended, false);
                OperationResult::Ok
            },
            Operation::ChannelReattach { resumed } => {
                self.server_change(ChannelState::Attached, resumed);
                OperationResult::Ok
            },
            Operation::ChannelFailed => {
                self.server_change(ChannelState::Failed, false);
                OperationResult::Ok
            },
            Operation::AdvanceTime { .. } => OperationResult::Ok,
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            status: self.status,
            channel: self.channel,
            discontinuities: self.discontinuities,
            disposed: self.disposed,
        }
    }

    /// The channel reaches `current`. Discontinuities are detected on every
    /// change; listeners are gone once the room is released.
    fn observe(&mut self, current: ChannelState, resumed: bool) {
        if current == ChannelState::Attached
            && !resumed
            && self.has_attached_once
            && !self.explicitly_detached
            && !self.disposed
        {
            self.discontinuities += 1;
        }
        self.channel = current;
    }

    fn server_change(&mut self, current: ChannelState, resumed: bool) {
        let previous = self.channel;
        self.observe(current, resumed);
        if previous != current && !self.status.is_releasing_or_released() {
            self.status = RoomStatus::from(current);
        }
    }

    /// Scripted channel attach; `true` when the channel ends up attached.
    fn channel_attach(&mut self) -> bool {
        let start = self.channel;
        let failure = self.attach_failures.pop_front();
        if start == ChannelState::Attached && failure.is_none() {
            return true;
        }

        self.observe(ChannelState::Attaching, false);
        match failure {
            None => {
                self.observe(ChannelState::Attached, false);
                true
            },
            Some(kind) => {
                self.observe(kind.resulting(start), kind == FailureKind::InPlace);
                false
            },
        }
    }

    /// Scripted channel detach; `true` when the channel ends up detached.
    fn channel_detach(&mut self) -> bool {
        let start = self.channel;
        let failure = self.detach_failures.pop_front();
        if start == ChannelState::Detached && failure.is_none() {
            return true;
        }

        self.observe(ChannelState::Detaching, false);
        match failure {
            None => {
                self.observe(ChannelState::Detached, false);
                true
            },
            Some(kind) => {
                self.observe(kind.resulting(start), kind == FailureKind::InPlace);
                false
            },
        }
    }

    fn apply_attach(&mut self) -> OperationResult {
        match self.status {
            RoomStatus::Attached => return OperationResult::Ok,
            RoomStatus::Released => return OperationResult::Error(OperationError::RoomIsReleased),
            RoomStatus::Releasing => return OperationResult::Error(OperationError::RoomIsReleasing),
            _ => {},
        }

        if self.channel_attach() {
            self.has_attached_once = true;
            self.explicitly_detached = false;
            self.status = RoomStatus::Attached;
            OperationResult::Ok
        } else {
            self.status = RoomStatus::from(self.channel);
            OperationResult::Error(OperationError::ChannelFailure)
        }
    }

    fn apply_detach(&mut self) -> OperationResult {
        match self.status {
            RoomStatus::Failed => return OperationResult::Error(OperationError::RoomInFailedState),
            RoomStatus::Released => return OperationResult::Error(OperationError::RoomIsReleased),
            RoomStatus::Releasing => return OperationResult::Error(OperationError::RoomIsReleasing),
            RoomStatus::Detached => return OperationResult::Ok,
            _ => {},
        }

        if self.channel_detach() {
            self.explicitly_detached = true;
            self.status = RoomStatus::Detached;
            OperationResult::Ok
        } else {
            self.status = RoomStatus::from(self.channel);
            OperationResult::Error(OperationError::ChannelFailure)
        }
    }

    fn apply_release(&mut self) {
        match self.status {
            RoomStatus::Released => return,
            RoomStatus::Initialized | RoomStatus::Detached => {},
            _ => {
                self.status = RoomStatus::Releasing;
                while self.channel != ChannelState::Failed && !self.channel_detach() {}
            },
        }
        self.disposed = true;
        self.status = RoomStatus::Released;
    }
}

impl Default for ModelRoom {
    fn default() -> Self {
        Self::new()
    }
}
