//! Occupancy feature: connection and presence counts for a room.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::{
    api::{ChatApi, OccupancyData},
    channel::{Channel, InboundMessage},
    error::ChatError,
    feature::{RoomFeature, spawn_pump},
    listeners::{Listeners, Subscription},
};

/// Channel event name for occupancy metrics.
pub const OCCUPANCY_EVENT: &str = "[meta]occupancy";

/// Occupancy metrics pushed by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OccupancyEvent {
    /// Connections attached to the room.
    pub connections: u64,
    /// Members present in the room.
    pub presence_members: u64,
}

impl From<OccupancyData> for OccupancyEvent {
    fn from(data: OccupancyData) -> Self {
        Self { connections: data.connections, presence_members: data.presence_members }
    }
}

#[derive(Debug, Deserialize)]
struct MetricsEnvelope {
    metrics: OccupancyData,
}

/// Decode an inbound `[meta]occupancy` event.
pub fn decode_occupancy(inbound: &InboundMessage) -> Result<OccupancyEvent, ChatError> {
    let envelope: MetricsEnvelope = serde_json::from_value(inbound.data.clone())
        .map_err(|e| ChatError::Decode { what: "occupancy event", reason: e.to_string() })?;
    Ok(envelope.metrics.into())
}

/// Occupancy of one room.
pub struct Occupancy {
    room: String,
    api: ChatApi,
    enable_events: bool,
    latest: Arc<Mutex<Option<OccupancyEvent>>>,
    listeners: Listeners<OccupancyEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Occupancy {
    /// Wire occupancy to the room channel. Metrics events are only received
    /// when `enable_events` is set.
    pub fn new(
        room: impl Into<String>,
        channel: &Arc<dyn Channel>,
        api: ChatApi,
        enable_events: bool,
    ) -> Self {
        let listeners: Listeners<OccupancyEvent> = Listeners::new();
        let latest = Arc::new(Mutex::new(None));

        let pump = enable_events.then(|| {
            let emit_to = listeners.clone();
            let latest = Arc::clone(&latest);
            spawn_pump("occupancy", channel.subscribe(), move |inbound: InboundMessage| {
                if inbound.name != OCCUPANCY_EVENT {
                    return;
                }
                match decode_occupancy(&inbound) {
                    Ok(event) => {
                        *latest.lock() = Some(event);
                        emit_to.emit(&event);
                    },
                    Err(error) => tracing::warn!(%error, "dropping undecodable occupancy event"),
                }
            })
        });

        Self { room: room.into(), api, enable_events, latest, listeners, pump: Mutex::new(pump) }
    }

    /// Fetch occupancy over REST.
    pub async fn get(&self) -> Result<OccupancyEvent, ChatError> {
        self.api.get_occupancy(&self.room).await.map(OccupancyEvent::from)
    }

    /// Latest metrics event seen on the channel.
    pub fn current(&self) -> Option<OccupancyEvent> {
        *self.latest.lock()
    }

    /// Subscribe to metrics events.
    pub fn subscribe(
        &self,
        listener: impl Fn(&OccupancyEvent) + Send + Sync + 'static,
    ) -> Result<Subscription, ChatError> {
        if !self.enable_events {
            return Err(ChatError::InvalidArgument(
                "occupancy events are not enabled for this room".to_string(),
            ));
        }
        Ok(self.listeners.add(listener))
    }
}

impl RoomFeature for Occupancy {
    fn feature_name(&self) -> &'static str {
        "occupancy"
    }

    fn dispose(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.listeners.clear();
    }
}

impl fmt::Debug for Occupancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Occupancy")
            .field("room", &self.room)
            .field("enable_events", &self.enable_events)
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}
