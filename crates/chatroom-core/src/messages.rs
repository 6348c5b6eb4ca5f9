//! Messages feature: REST send/update/delete/history plus realtime delivery.
//!
//! Every subscriber gets a resume point: the channel position its history
//! query should end at so that history and live delivery neither overlap nor
//! leave a gap. The point is
//!
//! - the channel serial when subscribing on an attached room,
//! - otherwise pending until the room attaches, then the attach serial,
//! - reset to the new attach serial after every discontinuity.
//!
//! [`MessageSubscription::history_before_subscribe`] waits for the point to
//! be known before querying.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    api::{
        ChatApi, DeleteMessageParams, PaginatedResult, QueryOptions, SendMessageParams,
        UpdateMessageParams,
    },
    channel::{Channel, ChannelState, InboundMessage},
    discontinuity::DiscontinuityEmitter,
    error::ChatError,
    feature::{RoomFeature, spawn_pump},
    listeners::{Listeners, Subscription},
    message::{Message, MessageAction, MessageEvent, check_reserved_keys},
    status::{RoomStatus, StatusManager},
};

/// Channel event name for chat messages.
pub const MESSAGE_EVENT: &str = "chat.message";

#[derive(Debug, Default, Deserialize)]
struct MessageData {
    #[serde(default)]
    text: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

fn missing(field: &str) -> ChatError {
    ChatError::Decode { what: "message event", reason: format!("missing {field}") }
}

/// Decode an inbound `chat.message` channel event.
pub fn decode_message_event(inbound: &InboundMessage) -> Result<MessageEvent, ChatError> {
    let kind = match inbound.action.as_deref() {
        None => MessageAction::Create,
        Some(name) => MessageAction::parse(name).ok_or_else(|| ChatError::Decode {
            what: "message event",
            reason: format!("unknown action {name:?}"),
        })?,
    };

    let data: MessageData = match &inbound.data {
        Value::Null => MessageData::default(),
        data => serde_json::from_value(data.clone()).map_err(|e| ChatError::Decode {
            what: "message event",
            reason: e.to_string(),
        })?,
    };

    let serial = inbound.serial.clone().ok_or_else(|| missing("serial"))?;
    let client_id = inbound.client_id.clone().ok_or_else(|| missing("client id"))?;
    let timestamp: DateTime<Utc> = inbound.timestamp.ok_or_else(|| missing("timestamp"))?;
    let version = match (&inbound.version, kind) {
        (Some(version), _) => version.clone(),
        (None, MessageAction::Create) => serial.clone(),
        (None, _) => return Err(missing("version")),
    };

    let message = Message {
        client_id,
        text: data.text,
        metadata: data.metadata,
        headers: inbound.headers.clone(),
        action: kind,
        version,
        timestamp,
        created_at: inbound.created_at.unwrap_or(timestamp),
        serial,
    };

    Ok(MessageEvent { kind, message })
}

#[derive(Default)]
struct ResumeState {
    next_id: u64,
    points: HashMap<u64, watch::Sender<Option<String>>>,
}

/// Per-subscriber resume points.
#[derive(Clone, Default)]
struct ResumePoints {
    state: Arc<Mutex<ResumeState>>,
}

impl ResumePoints {
    fn insert_with(
        &self,
        initial: impl FnOnce() -> Option<String>,
    ) -> (u64, watch::Receiver<Option<String>>) {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = watch::channel(initial());
        state.points.insert(id, tx);
        (id, rx)
    }

    fn remove(&self, id: u64) {
        self.state.lock().points.remove(&id);
    }

    fn reset_all(&self, serial: Option<&str>) {
        for tx in self.state.lock().points.values() {
            tx.send_replace(serial.map(str::to_string));
        }
    }

    fn resolve_pending(&self, serial: &str) {
        for tx in self.state.lock().points.values() {
            tx.send_if_modified(|point| {
                if point.is_none() {
                    *point = Some(serial.to_string());
                    true
                } else {
                    false
                }
            });
        }
    }

    fn clear(&self) {
        self.state.lock().points.clear();
    }

    fn len(&self) -> usize {
        self.state.lock().points.len()
    }
}

/// Messages of one room.
pub struct Messages {
    room: String,
    channel: Arc<dyn Channel>,
    api: ChatApi,
    status: Arc<StatusManager>,
    listeners: Listeners<MessageEvent>,
    resume: ResumePoints,
    pump: Mutex<Option<JoinHandle<()>>>,
    hooks: Mutex<Vec<Subscription>>,
}

impl Messages {
    /// Wire the feature to the room's channel, status and discontinuities.
    pub fn new(
        room: impl Into<String>,
        channel: Arc<dyn Channel>,
        api: ChatApi,
        status: Arc<StatusManager>,
        discontinuity: &DiscontinuityEmitter,
    ) -> Self {
        let listeners = Listeners::new();
        let resume = ResumePoints::default();

        let emit_to = listeners.clone();
        let pump = spawn_pump("messages", channel.subscribe(), move |inbound: InboundMessage| {
            if inbound.name != MESSAGE_EVENT {
                return;
            }
            match decode_message_event(&inbound) {
                Ok(event) => emit_to.emit(&event),
                Err(error) => tracing::warn!(%error, "dropping undecodable message event"),
            }
        });

        let on_discontinuity = {
            let resume = resume.clone();
            let channel = Arc::clone(&channel);
            discontinuity.on(move |_| {
                let attach_serial = (channel.state() == ChannelState::Attached)
                    .then(|| channel.properties().attach_serial)
                    .flatten();
                tracing::debug!(?attach_serial, "resetting message resume points");
                resume.reset_all(attach_serial.as_deref());
            })
        };

        let on_attached = {
            let resume = resume.clone();
            let channel = Arc::clone(&channel);
            status.on_change(move |change| {
                if change.current != RoomStatus::Attached {
                    return;
                }
                if let Some(serial) = channel.properties().attach_serial {
                    resume.resolve_pending(&serial);
                }
            })
        };

        Self {
            room: room.into(),
            channel,
            api,
            status,
            listeners,
            resume,
            pump: Mutex::new(Some(pump)),
            hooks: Mutex::new(vec![on_discontinuity, on_attached]),
        }
    }

    /// Send a message.
    pub async fn send(&self, params: SendMessageParams) -> Result<Message, ChatError> {
        check_reserved_keys("header", &params.headers)?;
        check_reserved_keys("metadata", &params.metadata)?;
        self.api.send_message(&self.room, &params).await
    }

    /// Update a message; returns the new version.
    pub async fn update(
        &self,
        message: &Message,
        params: UpdateMessageParams,
    ) -> Result<Message, ChatError> {
        check_reserved_keys("header", &params.message.headers)?;
        check_reserved_keys("metadata", &params.message.metadata)?;
        self.api.update_message(&self.room, message, &params).await
    }

    /// Delete a message; returns the deleted version.
    pub async fn delete(
        &self,
        message: &Message,
        params: DeleteMessageParams,
    ) -> Result<Message, ChatError> {
        self.api.delete_message(&self.room, message, &params).await
    }

    /// Fetch one message by serial.
    pub async fn get(&self, serial: &str) -> Result<Message, ChatError> {
        self.api.get_message(&self.room, serial).await
    }

    /// Query message history.
    pub async fn history(
        &self,
        options: &QueryOptions,
    ) -> Result<PaginatedResult<Message>, ChatError> {
        self.api.get_messages(&self.room, options, None).await
    }

    /// Subscribe to message events.
    pub fn subscribe(
        &self,
        listener: impl Fn(&MessageEvent) + Send + Sync + 'static,
    ) -> MessageSubscription {
        let (id, resume) = self.resume.insert_with(|| {
            if self.status.status() != RoomStatus::Attached {
                return None;
            }
            let properties = self.channel.properties();
            properties.channel_serial.or(properties.attach_serial)
        });
        tracing::debug!(
            room = %self.room,
            pending = resume.borrow().is_none(),
            "message subscriber added"
        );

        let resume_points = self.resume.clone();
        let subscription = Subscription::combine(vec![
            self.listeners.add(listener),
            Subscription::new(move || resume_points.remove(id)),
        ]);

        MessageSubscription { room: self.room.clone(), api: self.api.clone(), resume, subscription }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }
}

impl RoomFeature for Messages {
    fn feature_name(&self) -> &'static str {
        "messages"
    }

    fn dispose(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        for hook in self.hooks.lock().drain(..) {
            hook.unsubscribe();
        }
        self.listeners.clear();
        self.resume.clear();
    }
}

impl fmt::Debug for Messages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messages")
            .field("room", &self.room)
            .field("subscribers", &self.listeners.len())
            .field("resume_points", &self.resume.len())
            .finish_non_exhaustive()
    }
}

/// A live message subscription.
pub struct MessageSubscription {
    room: String,
    api: ChatApi,
    resume: watch::Receiver<Option<String>>,
    subscription: Subscription,
}

impl MessageSubscription {
    /// Current resume point, `None` while the room has not attached yet.
    pub fn resume_serial(&self) -> Option<String> {
        self.resume.borrow().clone()
    }

    /// Messages published before this subscription started receiving,
    /// newest first.
    ///
    /// Waits until the resume point is known. Fails with
    /// [`ChatError::ReleasedBeforeOperationCompleted`] if the room is released
    /// first.
    pub async fn history_before_subscribe(
        &self,
        options: &QueryOptions,
    ) -> Result<PaginatedResult<Message>, ChatError> {
        let mut resume = self.resume.clone();
        let from_serial = resume
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ChatError::ReleasedBeforeOperationCompleted)?
            .clone()
            .ok_or(ChatError::ReleasedBeforeOperationCompleted)?;

        self.api.get_messages(&self.room, options, Some(&from_serial)).await
    }

    /// Stop receiving messages.
    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}

impl fmt::Debug for MessageSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSubscription")
            .field("room", &self.room)
            .field("resume_serial", &*self.resume.borrow())
            .finish_non_exhaustive()
    }
}
