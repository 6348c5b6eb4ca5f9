//! Realtime channel interface consumed by the room.
//!
//! The room drives exactly one [`Channel`], obtained from a
//! [`RealtimeClient`]. Only the lifecycle manager calls `attach`, `detach` and
//! `release`; features publish, subscribe and use presence.
//!
//! # Contract
//!
//! - A channel MUST broadcast the state change caused by `attach()` or
//!   `detach()` on [`Channel::on_state_change`] before that call resolves.
//!   The lifecycle manager relies on this to order its own bookkeeping after
//!   the change has been observed.
//! - `properties()` MUST reflect the latest attach before the attached state
//!   change is broadcast.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::ErrorInfo;

/// State of the underlying realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Never attached.
    Initialized,
    /// Attach in progress.
    Attaching,
    /// Attached.
    Attached,
    /// Detach in progress.
    Detaching,
    /// Detached.
    Detached,
    /// Connection interrupted; retrying.
    Suspended,
    /// Unrecoverable failure.
    Failed,
}

/// A channel state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStateChange {
    /// New state.
    pub current: ChannelState,
    /// Previous state.
    pub previous: ChannelState,
    /// Reason for the change, if any.
    pub reason: Option<ErrorInfo>,
    /// Whether message continuity was preserved across the change.
    pub resumed: bool,
    /// When the channel will retry on its own.
    pub retry_in: Option<Duration>,
}

impl ChannelStateChange {
    /// Create a change with no reason and no retry hint.
    pub fn new(current: ChannelState, previous: ChannelState, resumed: bool) -> Self {
        Self { current, previous, reason: None, resumed, retry_in: None }
    }

    /// Attach a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: ErrorInfo) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Whether this is an in-place update (same state, e.g. attached to
    /// attached after a server-side reattach).
    pub fn is_update(&self) -> bool {
        self.current == self.previous
    }
}

/// Serials recorded by the channel on attach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelProperties {
    /// Serial of the most recent attach.
    pub attach_serial: Option<String>,
    /// Serial of the last message seen on the channel.
    pub channel_serial: Option<String>,
}

/// Capabilities requested when obtaining a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelMode {
    /// Publish messages.
    Publish,
    /// Receive messages.
    Subscribe,
    /// Enter presence.
    Presence,
    /// Receive presence events.
    PresenceSubscribe,
}

/// Options used to obtain a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Requested modes.
    pub modes: Vec<ChannelMode>,
    /// Channel parameters (for example occupancy metrics).
    pub params: BTreeMap<String, String>,
}

/// Message published to the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Event name.
    pub name: String,
    /// Payload.
    pub data: Value,
    /// Header map carried in message extras.
    pub headers: Map<String, Value>,
    /// Ephemeral messages are not persisted by the service.
    pub ephemeral: bool,
}

impl OutboundMessage {
    /// Ephemeral message with no payload.
    pub fn ephemeral(name: impl Into<String>) -> Self {
        Self { name: name.into(), data: Value::Null, headers: Map::new(), ephemeral: true }
    }
}

/// Message received from the channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    /// Event name.
    pub name: String,
    /// Payload.
    pub data: Value,
    /// Publishing client.
    pub client_id: Option<String>,
    /// Message serial.
    pub serial: Option<String>,
    /// Version serial (differs from `serial` for updates and deletes).
    pub version: Option<String>,
    /// Message action (`message.create`, `message.update`, ...).
    pub action: Option<String>,
    /// When this version was published.
    pub timestamp: Option<DateTime<Utc>>,
    /// When the original message was created.
    pub created_at: Option<DateTime<Utc>>,
    /// Header map carried in message extras.
    pub headers: Map<String, Value>,
}

/// Presence action reported by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceAction {
    /// Member already present when the set was synced.
    Present,
    /// Member entered.
    Enter,
    /// Member left.
    Leave,
    /// Member updated its data.
    Update,
}

/// Presence message exchanged with the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceMessage {
    /// Action.
    pub action: PresenceAction,
    /// Member client id.
    pub client_id: String,
    /// Member data.
    pub data: Value,
    /// When the action happened.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Realtime channel used by a room.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Channel name.
    fn name(&self) -> &str;

    /// Current state.
    fn state(&self) -> ChannelState;

    /// Error behind the current state, if any.
    fn error_reason(&self) -> Option<ErrorInfo>;

    /// Attach serials.
    fn properties(&self) -> ChannelProperties;

    /// Attach the channel.
    async fn attach(&self) -> Result<(), ErrorInfo>;

    /// Detach the channel.
    async fn detach(&self) -> Result<(), ErrorInfo>;

    /// Release the channel resource. The channel must not be used afterward.
    fn release(&self);

    /// Publish a message.
    async fn publish(&self, message: OutboundMessage) -> Result<(), ErrorInfo>;

    /// Stream of inbound messages.
    fn subscribe(&self) -> broadcast::Receiver<InboundMessage>;

    /// Stream of state changes.
    fn on_state_change(&self) -> broadcast::Receiver<ChannelStateChange>;

    /// Current presence set.
    async fn presence_get(&self) -> Result<Vec<PresenceMessage>, ErrorInfo>;

    /// Enter presence with `data`.
    async fn presence_enter(&self, data: Value) -> Result<(), ErrorInfo>;

    /// Update presence data.
    async fn presence_update(&self, data: Value) -> Result<(), ErrorInfo>;

    /// Leave presence.
    async fn presence_leave(&self, data: Value) -> Result<(), ErrorInfo>;

    /// Stream of presence events.
    fn presence_subscribe(&self) -> broadcast::Receiver<PresenceMessage>;
}

/// Source of channels and the local client identity.
pub trait RealtimeClient: Send + Sync + 'static {
    /// Identity of the local client.
    fn client_id(&self) -> String;

    /// Obtain the channel named `name` with `options`.
    fn channel(&self, name: &str, options: ChannelOptions) -> Arc<dyn Channel>;
}
