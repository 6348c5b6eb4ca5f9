//! A chat room: one channel, its lifecycle and its features.

use std::{fmt, sync::Arc};

use crate::{
    api::{ChatApi, Requester},
    channel::{Channel, RealtimeClient},
    config::RoomOptions,
    discontinuity::{DiscontinuityEmitter, DiscontinuityEvent},
    env::Environment,
    error::{ChatError, ErrorInfo},
    feature::RoomFeature,
    lifecycle::RoomLifecycleManager,
    listeners::Subscription,
    messages::Messages,
    occupancy::Occupancy,
    presence::Presence,
    reactions::Reactions,
    status::{RoomStatus, RoomStatusChange, StatusManager},
    typing::Typing,
};

/// Name of the realtime channel backing room `room`.
pub fn channel_name(room: &str) -> String {
    format!("{room}::$chat")
}

/// A chat room.
///
/// Must be created inside a tokio runtime; features start their inbound
/// tasks on construction.
pub struct Room<E: Environment> {
    name: String,
    options: RoomOptions,
    channel: Arc<dyn Channel>,
    status: Arc<StatusManager>,
    discontinuity: Arc<DiscontinuityEmitter>,
    lifecycle: RoomLifecycleManager<E>,
    messages: Arc<Messages>,
    presence: Arc<Presence>,
    typing: Arc<Typing<E>>,
    reactions: Arc<Reactions>,
    occupancy: Arc<Occupancy>,
}

impl<E: Environment> Room<E> {
    /// Build a room and its features over a channel from `realtime`.
    pub fn new(
        env: E,
        name: impl Into<String>,
        options: RoomOptions,
        realtime: &dyn RealtimeClient,
        requester: Arc<dyn Requester>,
    ) -> Result<Self, ChatError> {
        options.validate()?;

        let name = name.into();
        let client_id = realtime.client_id();
        let channel = realtime.channel(&channel_name(&name), options.channel_options());
        let status = Arc::new(StatusManager::new());
        let discontinuity = Arc::new(DiscontinuityEmitter::new());
        let api = ChatApi::new(requester, client_id.clone());

        let lifecycle = RoomLifecycleManager::new(
            env.clone(),
            name.clone(),
            Arc::clone(&channel),
            Arc::clone(&status),
            Arc::clone(&discontinuity),
        );

        let messages = Arc::new(Messages::new(
            name.clone(),
            Arc::clone(&channel),
            api.clone(),
            Arc::clone(&status),
            &discontinuity,
        ));
        let presence = Arc::new(Presence::new(
            Arc::clone(&channel),
            Arc::clone(&status),
            options.presence.enable_events,
        ));
        let typing = Arc::new(Typing::new(
            env,
            options.typing.clone(),
            Arc::clone(&channel),
            Arc::clone(&status),
        ));
        let reactions =
            Arc::new(Reactions::new(Arc::clone(&channel), Arc::clone(&status), client_id));
        let occupancy =
            Arc::new(Occupancy::new(name.clone(), &channel, api, options.occupancy.enable_events));

        let features: [Arc<dyn RoomFeature>; 5] = [
            Arc::clone(&messages) as Arc<dyn RoomFeature>,
            Arc::clone(&presence) as Arc<dyn RoomFeature>,
            Arc::clone(&typing) as Arc<dyn RoomFeature>,
            Arc::clone(&reactions) as Arc<dyn RoomFeature>,
            Arc::clone(&occupancy) as Arc<dyn RoomFeature>,
        ];
        for feature in features {
            lifecycle.register_feature(feature);
        }

        tracing::debug!(room = %name, channel = channel.name(), "room created");

        Ok(Self {
            name,
            options,
            channel,
            status,
            discontinuity,
            lifecycle,
            messages,
            presence,
            typing,
            reactions,
            occupancy,
        })
    }

    /// Room name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Options the room was created with.
    pub fn options(&self) -> &RoomOptions {
        &self.options
    }

    /// Underlying channel.
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// Attach the room.
    pub async fn attach(&self) -> Result<(), ChatError> {
        self.lifecycle.attach().await
    }

    /// Detach the room.
    pub async fn detach(&self) -> Result<(), ChatError> {
        self.lifecycle.detach().await
    }

    /// Release the room and dispose its features. Never fails.
    pub async fn release(&self) {
        self.lifecycle.release().await;
    }

    /// Current status.
    pub fn status(&self) -> RoomStatus {
        self.status.status()
    }

    /// Error from the last status change.
    pub fn error(&self) -> Option<ErrorInfo> {
        self.status.error()
    }

    /// Subscribe to status changes.
    pub fn on_status_change(
        &self,
        listener: impl Fn(&RoomStatusChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.status.on_change(listener)
    }

    /// Subscribe to discontinuities.
    pub fn on_discontinuity(
        &self,
        listener: impl Fn(&DiscontinuityEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.discontinuity.on(listener)
    }

    /// Messages.
    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    /// Presence.
    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Typing indicators.
    pub fn typing(&self) -> &Typing<E> {
        &self.typing
    }

    /// Reactions.
    pub fn reactions(&self) -> &Reactions {
        &self.reactions
    }

    /// Occupancy.
    pub fn occupancy(&self) -> &Occupancy {
        &self.occupancy
    }

    /// Whether no lifecycle operation is queued or running.
    pub fn is_idle(&self) -> bool {
        self.lifecycle.is_idle()
    }
}

impl<E: Environment> fmt::Debug for Room<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("status", &self.status.status())
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}
