//! Room-level reactions: ephemeral, not persisted, no history.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;

use crate::{
    channel::{Channel, InboundMessage, OutboundMessage},
    error::ChatError,
    feature::{RoomFeature, ensure_attached, spawn_pump},
    listeners::{Listeners, Subscription},
    message::check_reserved_keys,
    status::StatusManager,
};

/// Channel event name for room reactions.
pub const REACTION_EVENT: &str = "roomReaction";

/// Parameters for sending a reaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SendReactionParams {
    /// Reaction name, for example `like`. Must not be empty.
    pub name: String,
    /// Application metadata.
    pub metadata: Map<String, Value>,
    /// Application headers.
    pub headers: Map<String, Value>,
}

/// A reaction received on the room.
#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    /// Reaction name.
    pub name: String,
    /// Application metadata.
    pub metadata: Map<String, Value>,
    /// Application headers.
    pub headers: Map<String, Value>,
    /// Sender.
    pub client_id: String,
    /// When it was sent.
    pub created_at: DateTime<Utc>,
    /// Whether the local client sent it.
    pub is_self: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReactionData {
    #[serde(rename = "type")]
    name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
}

/// Decode an inbound `roomReaction` event as seen by `local_client_id`.
pub fn decode_reaction(
    inbound: &InboundMessage,
    local_client_id: &str,
) -> Result<Reaction, ChatError> {
    let data: ReactionData = serde_json::from_value(inbound.data.clone())
        .map_err(|e| ChatError::Decode { what: "reaction", reason: e.to_string() })?;
    let missing =
        |field: &str| ChatError::Decode { what: "reaction", reason: format!("missing {field}") };
    let client_id = inbound.client_id.clone().ok_or_else(|| missing("client id"))?;
    let created_at = inbound.timestamp.ok_or_else(|| missing("timestamp"))?;

    Ok(Reaction {
        name: data.name,
        metadata: data.metadata,
        headers: inbound.headers.clone(),
        is_self: client_id == local_client_id,
        client_id,
        created_at,
    })
}

/// Reactions of one room.
pub struct Reactions {
    channel: Arc<dyn Channel>,
    status: Arc<StatusManager>,
    listeners: Listeners<Reaction>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Reactions {
    /// Wire reactions to the room channel.
    pub fn new(channel: Arc<dyn Channel>, status: Arc<StatusManager>, client_id: String) -> Self {
        let listeners: Listeners<Reaction> = Listeners::new();

        let emit_to = listeners.clone();
        let pump = spawn_pump("reactions", channel.subscribe(), move |inbound: InboundMessage| {
            if inbound.name != REACTION_EVENT {
                return;
            }
            match decode_reaction(&inbound, &client_id) {
                Ok(reaction) => emit_to.emit(&reaction),
                Err(error) => tracing::warn!(%error, "dropping undecodable reaction"),
            }
        });

        Self { channel, status, listeners, pump: Mutex::new(Some(pump)) }
    }

    /// Send a reaction. Requires the room to be attached.
    pub async fn send(&self, params: SendReactionParams) -> Result<(), ChatError> {
        if params.name.is_empty() {
            return Err(ChatError::InvalidArgument("reaction name must not be empty".to_string()));
        }
        check_reserved_keys("header", &params.headers)?;
        check_reserved_keys("metadata", &params.metadata)?;
        ensure_attached(&self.status).await?;

        let data = ReactionData { name: params.name, metadata: params.metadata };
        let data =
            serde_json::to_value(data).map_err(|e| ChatError::InvalidArgument(e.to_string()))?;
        let message = OutboundMessage {
            data,
            headers: params.headers,
            ..OutboundMessage::ephemeral(REACTION_EVENT)
        };

        self.channel
            .publish(message)
            .await
            .map_err(|e| ChatError::channel("failed to send reaction", e))
    }

    /// Subscribe to reactions.
    pub fn subscribe(&self, listener: impl Fn(&Reaction) + Send + Sync + 'static) -> Subscription {
        self.listeners.add(listener)
    }
}

impl RoomFeature for Reactions {
    fn feature_name(&self) -> &'static str {
        "reactions"
    }

    fn dispose(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.listeners.clear();
    }
}

impl fmt::Debug for Reactions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactions")
            .field("subscribers", &self.listeners.len())
            .finish_non_exhaustive()
    }
}
