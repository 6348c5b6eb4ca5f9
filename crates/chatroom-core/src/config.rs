//! Room configuration.

use std::time::Duration;

use crate::{
    channel::{ChannelMode, ChannelOptions},
    error::ChatError,
};

/// Default interval between `typing.started` heartbeats.
pub const DEFAULT_HEARTBEAT_THROTTLE: Duration = Duration::from_secs(10);

/// Default grace period added to the heartbeat throttle before a silent peer
/// is considered to have stopped typing.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(2);

/// Typing indicator options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingOptions {
    /// Minimum interval between `typing.started` heartbeats sent by this
    /// client. Peers are expected to send at the same rate.
    pub heartbeat_throttle: Duration,
    /// Extra time to wait after a missed heartbeat before pruning a peer.
    pub timeout: Duration,
}

impl TypingOptions {
    /// How long after a peer's last `typing.started` it is pruned.
    pub fn prune_after(&self) -> Duration {
        self.heartbeat_throttle + self.timeout
    }
}

impl Default for TypingOptions {
    fn default() -> Self {
        Self { heartbeat_throttle: DEFAULT_HEARTBEAT_THROTTLE, timeout: DEFAULT_TYPING_TIMEOUT }
    }
}

/// Presence options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceOptions {
    /// Receive presence events (requests the presence-subscribe mode).
    pub enable_events: bool,
}

impl Default for PresenceOptions {
    fn default() -> Self {
        Self { enable_events: true }
    }
}

/// Occupancy options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyOptions {
    /// Receive occupancy metrics events on the channel.
    pub enable_events: bool,
}

/// Options for a room.
///
/// Two `Rooms::get` calls for the same name must pass equal options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomOptions {
    /// Typing indicators.
    pub typing: TypingOptions,
    /// Presence.
    pub presence: PresenceOptions,
    /// Occupancy.
    pub occupancy: OccupancyOptions,
}

impl RoomOptions {
    /// Reject option values the room cannot run with.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.typing.heartbeat_throttle.is_zero() {
            return Err(ChatError::InvalidArgument(
                "typing heartbeat throttle must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Channel options implied by these room options.
    pub fn channel_options(&self) -> ChannelOptions {
        let mut options = ChannelOptions {
            modes: vec![ChannelMode::Publish, ChannelMode::Subscribe, ChannelMode::Presence],
            ..ChannelOptions::default()
        };

        if self.presence.enable_events {
            options.modes.push(ChannelMode::PresenceSubscribe);
        }

        if self.occupancy.enable_events {
            options.params.insert("occupancy".to_string(), "metrics".to_string());
        }

        options
    }
}
