//! Presence feature.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::{
    channel::{Channel, PresenceAction, PresenceMessage},
    error::ChatError,
    feature::{RoomFeature, ensure_attached, spawn_pump},
    listeners::{Listeners, Subscription},
    status::StatusManager,
};

/// A member of the presence set.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceMember {
    /// Member client id.
    pub client_id: String,
    /// Member data.
    pub data: Value,
    /// Last time the member entered or updated.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A presence change.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEvent {
    /// What happened.
    pub action: PresenceAction,
    /// Member client id.
    pub client_id: String,
    /// Member data.
    pub data: Value,
    /// When it happened.
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<PresenceMessage> for PresenceEvent {
    fn from(message: PresenceMessage) -> Self {
        Self {
            action: message.action,
            client_id: message.client_id,
            data: message.data,
            timestamp: message.timestamp,
        }
    }
}

/// Presence of one room.
pub struct Presence {
    channel: Arc<dyn Channel>,
    status: Arc<StatusManager>,
    enable_events: bool,
    listeners: Listeners<PresenceEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Presence {
    /// Wire presence to the room channel. Events are only received when
    /// `enable_events` is set.
    pub fn new(channel: Arc<dyn Channel>, status: Arc<StatusManager>, enable_events: bool) -> Self {
        let listeners: Listeners<PresenceEvent> = Listeners::new();

        let pump = enable_events.then(|| {
            let emit_to = listeners.clone();
            spawn_pump("presence", channel.presence_subscribe(), move |message: PresenceMessage| {
                emit_to.emit(&PresenceEvent::from(message));
            })
        });

        Self { channel, status, enable_events, listeners, pump: Mutex::new(pump) }
    }

    /// Current presence set. Requires the room to be attached.
    pub async fn get(&self) -> Result<Vec<PresenceMember>, ChatError> {
        ensure_attached(&self.status).await?;
        let members = self
            .channel
            .presence_get()
            .await
            .map_err(|e| ChatError::channel("failed to get presence", e))?;

        Ok(members
            .into_iter()
            .filter(|m| m.action != PresenceAction::Leave)
            .map(|m| PresenceMember {
                client_id: m.client_id,
                data: m.data,
                updated_at: m.timestamp,
            })
            .collect())
    }

    /// Whether `client_id` is in the presence set.
    pub async fn is_user_present(&self, client_id: &str) -> Result<bool, ChatError> {
        Ok(self.get().await?.iter().any(|m| m.client_id == client_id))
    }

    /// Enter presence with `data`.
    pub async fn enter(&self, data: Value) -> Result<(), ChatError> {
        ensure_attached(&self.status).await?;
        self.channel
            .presence_enter(data)
            .await
            .map_err(|e| ChatError::channel("failed to enter presence", e))
    }

    /// Replace this client's presence data.
    pub async fn update(&self, data: Value) -> Result<(), ChatError> {
        ensure_attached(&self.status).await?;
        self.channel
            .presence_update(data)
            .await
            .map_err(|e| ChatError::channel("failed to update presence", e))
    }

    /// Leave presence.
    pub async fn leave(&self, data: Value) -> Result<(), ChatError> {
        ensure_attached(&self.status).await?;
        self.channel
            .presence_leave(data)
            .await
            .map_err(|e| ChatError::channel("failed to leave presence", e))
    }

    /// Subscribe to presence events.
    pub fn subscribe(
        &self,
        listener: impl Fn(&PresenceEvent) + Send + Sync + 'static,
    ) -> Result<Subscription, ChatError> {
        if !self.enable_events {
            return Err(ChatError::InvalidArgument(
                "presence events are not enabled for this room".to_string(),
            ));
        }
        Ok(self.listeners.add(listener))
    }
}

impl RoomFeature for Presence {
    fn feature_name(&self) -> &'static str {
        "presence"
    }

    fn dispose(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.listeners.clear();
    }
}

impl fmt::Debug for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Presence")
            .field("enable_events", &self.enable_events)
            .field("subscribers", &self.listeners.len())
            .finish_non_exhaustive()
    }
}
