//! Scriptable in-memory channel.
//!
//! Behaves like a realtime channel for the room's purposes: `attach()` and
//! `detach()` broadcast the transitional state and then the final state
//! before they resolve, `properties()` is updated before the attached change
//! is broadcast. Tests script failures, hold an attach in flight, inject
//! state changes the service would cause, and deliver inbound messages.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
};

use async_trait::async_trait;
use chatroom_core::{
    Channel, ChannelOptions, ChannelProperties, ChannelState, ChannelStateChange, ErrorInfo,
    InboundMessage, OutboundMessage, PresenceAction, PresenceMessage,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

const STREAM_CAPACITY: usize = 256;

/// Serial a fresh channel reports before any message was seen.
pub const INITIAL_SERIAL: &str = "00000000000000000000";

/// Scripted result of the next attach or detach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The call succeeds.
    Succeed,
    /// The call fails with `error`, leaving the channel in `resulting`, or
    /// back in the state it started from when `None`.
    Fail {
        /// Error returned to the caller.
        error: ErrorInfo,
        /// State after the failure.
        resulting: Option<ChannelState>,
    },
}

impl Outcome {
    /// Failure that leaves the channel in `resulting`.
    pub fn fail(resulting: ChannelState) -> Self {
        Self::Fail {
            error: ErrorInfo::new(90_000, 500, "scripted failure"),
            resulting: Some(resulting),
        }
    }

    /// Failure that leaves the channel where it was.
    pub fn fail_in_place() -> Self {
        Self::Fail { error: ErrorInfo::new(90_001, 500, "scripted failure"), resulting: None }
    }
}

#[derive(Default)]
struct Calls {
    attach: usize,
    detach: usize,
    release: usize,
}

struct MockState {
    state: ChannelState,
    error: Option<ErrorInfo>,
    properties: ChannelProperties,
    last_serial: Option<String>,
    attach_outcomes: VecDeque<Outcome>,
    detach_outcomes: VecDeque<Outcome>,
    attach_gate: Option<oneshot::Receiver<()>>,
    publish_error: Option<ErrorInfo>,
    calls: Calls,
    published: Vec<OutboundMessage>,
    presence: BTreeMap<String, PresenceMessage>,
}

/// In-memory [`Channel`] for tests.
pub struct MockChannel {
    name: String,
    client_id: String,
    options: ChannelOptions,
    state: Mutex<MockState>,
    messages: broadcast::Sender<InboundMessage>,
    changes: broadcast::Sender<ChannelStateChange>,
    presence_events: broadcast::Sender<PresenceMessage>,
}

impl MockChannel {
    /// Channel `name` used by `client_id`.
    pub fn new(
        name: impl Into<String>,
        client_id: impl Into<String>,
        options: ChannelOptions,
    ) -> Self {
        Self {
            name: name.into(),
            client_id: client_id.into(),
            options,
            state: Mutex::new(MockState {
                state: ChannelState::Initialized,
                error: None,
                properties: ChannelProperties::default(),
                last_serial: None,
                attach_outcomes: VecDeque::new(),
                detach_outcomes: VecDeque::new(),
                attach_gate: None,
                publish_error: None,
                calls: Calls::default(),
                published: Vec::new(),
                presence: BTreeMap::new(),
            }),
            messages: broadcast::channel(STREAM_CAPACITY).0,
            changes: broadcast::channel(STREAM_CAPACITY).0,
            presence_events: broadcast::channel(STREAM_CAPACITY).0,
        }
    }

    /// Options the channel was obtained with.
    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Script the outcome of the next unscripted attach.
    pub fn script_attach(&self, outcome: Outcome) {
        self.state.lock().attach_outcomes.push_back(outcome);
    }

    /// Script the outcome of the next unscripted detach.
    pub fn script_detach(&self, outcome: Outcome) {
        self.state.lock().detach_outcomes.push_back(outcome);
    }

    /// Hold the next attach after it broadcasts `Attaching` until the
    /// returned sender fires (or is dropped).
    pub fn hold_next_attach(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().attach_gate = Some(rx);
        tx
    }

    /// Make every publish fail with `error` until cleared with `None`.
    pub fn fail_publishes(&self, error: Option<ErrorInfo>) {
        self.state.lock().publish_error = error;
    }

    /// Number of `attach()` calls.
    pub fn attach_calls(&self) -> usize {
        self.state.lock().calls.attach
    }

    /// Number of `detach()` calls.
    pub fn detach_calls(&self) -> usize {
        self.state.lock().calls.detach
    }

    /// Number of `release()` calls.
    pub fn release_calls(&self) -> usize {
        self.state.lock().calls.release
    }

    /// Everything published so far.
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state.lock().published.clone()
    }

    /// Names of everything published so far.
    pub fn published_names(&self) -> Vec<String> {
        self.state.lock().published.iter().map(|m| m.name.clone()).collect()
    }

    /// Forget the publish log.
    pub fn clear_published(&self) {
        self.state.lock().published.clear();
    }

    /// Simulate a transition caused by the service, for example a suspension
    /// or a server-initiated re-attach.
    pub fn inject_state(&self, current: ChannelState, resumed: bool, reason: Option<ErrorInfo>) {
        if current == ChannelState::Attached {
            let mut state = self.state.lock();
            state.properties.attach_serial =
                Some(state.last_serial.clone().unwrap_or_else(|| INITIAL_SERIAL.to_string()));
        }
        self.transition(current, resumed, reason);
    }

    /// Deliver an inbound message to subscribers. A message carrying a
    /// version or serial advances the channel serial.
    pub fn deliver(&self, message: InboundMessage) {
        if let Some(position) = message.version.as_ref().or(message.serial.as_ref()) {
            let mut state = self.state.lock();
            state.last_serial = Some(position.clone());
            state.properties.channel_serial = Some(position.clone());
        }
        let _ = self.messages.send(message);
    }

    /// Deliver a presence event from another client.
    pub fn deliver_presence(&self, message: PresenceMessage) {
        self.apply_presence(message);
    }

    fn apply_presence(&self, message: PresenceMessage) {
        {
            let mut state = self.state.lock();
            match message.action {
                PresenceAction::Leave => {
                    state.presence.remove(&message.client_id);
                },
                PresenceAction::Enter | PresenceAction::Update | PresenceAction::Present => {
                    state.presence.insert(message.client_id.clone(), message.clone());
                },
            }
        }
        let _ = self.presence_events.send(message);
    }

    fn transition(&self, current: ChannelState, resumed: bool, reason: Option<ErrorInfo>) {
        let change = {
            let mut state = self.state.lock();
            let previous = state.state;
            state.state = current;
            state.error.clone_from(&reason);
            ChannelStateChange { current, previous, reason, resumed, retry_in: None }
        };
        let _ = self.changes.send(change);
    }

    fn fail(
        &self,
        start: ChannelState,
        error: ErrorInfo,
        resulting: Option<ChannelState>,
    ) -> ErrorInfo {
        // Reverting to where the call started is not a fresh attachment.
        let state = resulting.unwrap_or(start);
        self.transition(state, resulting.is_none(), Some(error.clone()));
        error
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ChannelState {
        self.state.lock().state
    }

    fn error_reason(&self) -> Option<ErrorInfo> {
        self.state.lock().error.clone()
    }

    fn properties(&self) -> ChannelProperties {
        self.state.lock().properties.clone()
    }

    async fn attach(&self) -> Result<(), ErrorInfo> {
        let (start, outcome, gate) = {
            let mut state = self.state.lock();
            state.calls.attach += 1;
            let outcome = state.attach_outcomes.pop_front().unwrap_or(Outcome::Succeed);
            (state.state, outcome, state.attach_gate.take())
        };

        if start == ChannelState::Attached && outcome == Outcome::Succeed {
            return Ok(());
        }

        self.transition(ChannelState::Attaching, false, None);
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        match outcome {
            Outcome::Succeed => {
                {
                    let mut state = self.state.lock();
                    let serial =
                        state.last_serial.clone().unwrap_or_else(|| INITIAL_SERIAL.to_string());
                    state.properties.attach_serial = Some(serial);
                }
                self.transition(ChannelState::Attached, false, None);
                Ok(())
            },
            Outcome::Fail { error, resulting } => Err(self.fail(start, error, resulting)),
        }
    }

    async fn detach(&self) -> Result<(), ErrorInfo> {
        let (start, outcome) = {
            let mut state = self.state.lock();
            state.calls.detach += 1;
            (state.state, state.detach_outcomes.pop_front().unwrap_or(Outcome::Succeed))
        };

        if start == ChannelState::Detached && outcome == Outcome::Succeed {
            return Ok(());
        }

        self.transition(ChannelState::Detaching, false, None);
        match outcome {
            Outcome::Succeed => {
                self.transition(ChannelState::Detached, false, None);
                Ok(())
            },
            Outcome::Fail { error, resulting } => Err(self.fail(start, error, resulting)),
        }
    }

    fn release(&self) {
        self.state.lock().calls.release += 1;
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), ErrorInfo> {
        let mut state = self.state.lock();
        if let Some(error) = state.publish_error.clone() {
            return Err(error);
        }
        state.published.push(message);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.messages.subscribe()
    }

    fn on_state_change(&self) -> broadcast::Receiver<ChannelStateChange> {
        self.changes.subscribe()
    }

    async fn presence_get(&self) -> Result<Vec<PresenceMessage>, ErrorInfo> {
        Ok(self.state.lock().presence.values().cloned().collect())
    }

    async fn presence_enter(&self, data: Value) -> Result<(), ErrorInfo> {
        self.apply_presence(self.own_presence(PresenceAction::Enter, data));
        Ok(())
    }

    async fn presence_update(&self, data: Value) -> Result<(), ErrorInfo> {
        self.apply_presence(self.own_presence(PresenceAction::Update, data));
        Ok(())
    }

    async fn presence_leave(&self, data: Value) -> Result<(), ErrorInfo> {
        self.apply_presence(self.own_presence(PresenceAction::Leave, data));
        Ok(())
    }

    fn presence_subscribe(&self) -> broadcast::Receiver<PresenceMessage> {
        self.presence_events.subscribe()
    }
}

impl MockChannel {
    fn own_presence(&self, action: PresenceAction, data: Value) -> PresenceMessage {
        PresenceMessage {
            action,
            client_id: self.client_id.clone(),
            data,
            timestamp: Some(Utc::now()),
        }
    }
}

impl fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockChannel")
            .field("name", &self.name)
            .field("state", &state.state)
            .field("attach_calls", &state.calls.attach)
            .field("detach_calls", &state.calls.detach)
            .finish_non_exhaustive()
    }
}
