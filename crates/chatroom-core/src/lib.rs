//! Chat room SDK core.
//!
//! Rooms, messages, presence, typing indicators, reactions and occupancy on
//! top of an abstract realtime [`Channel`] and REST [`Requester`]. The piece
//! with real depth is the room lifecycle: attach, detach and release are
//! serialized through a priority queue, channel state changes are mapped to
//! room statuses, and non-resumed re-attachments are reported as
//! discontinuities.
//!
//! ## Architecture
//!
//! ```text
//! Rooms
//!   └─ Room
//!        ├─ RoomLifecycleManager  (operation queue + channel event handler)
//!        ├─ StatusManager         (status, error, listeners)
//!        ├─ DiscontinuityEmitter
//!        └─ features              (disposed on release, in this order)
//!             ├─ Messages         (REST + resume points)
//!             ├─ Presence
//!             ├─ Typing           (heartbeats + peer pruning)
//!             ├─ Reactions
//!             └─ Occupancy
//! ```
//!
//! All timing goes through [`Environment`], so tests run on a paused or
//! simulated clock.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod channel;
pub mod config;
pub mod discontinuity;
pub mod env;
pub mod error;
pub mod feature;
pub mod lifecycle;
pub mod listeners;
pub mod message;
pub mod messages;
pub mod occupancy;
pub mod presence;
pub mod queue;
pub mod reactions;
pub mod room;
pub mod rooms;
pub mod single_flight;
pub mod status;
mod system_env;
pub mod typing;

pub use api::{
    ApiRequest, ApiResponse, ChatApi, DeleteMessageParams, Method, OccupancyData, OrderBy,
    PaginatedResult, QueryOptions, Requester, SendMessageParams, UpdateMessageParams,
};
pub use channel::{
    Channel, ChannelMode, ChannelOptions, ChannelProperties, ChannelState, ChannelStateChange,
    InboundMessage, OutboundMessage, PresenceAction, PresenceMessage, RealtimeClient,
};
pub use config::{OccupancyOptions, PresenceOptions, RoomOptions, TypingOptions};
pub use discontinuity::{DiscontinuityEmitter, DiscontinuityEvent};
pub use env::Environment;
pub use error::{ChatError, ErrorCode, ErrorInfo};
pub use feature::RoomFeature;
pub use lifecycle::{RELEASE_RETRY_DELAY, RoomLifecycleManager};
pub use listeners::{Listeners, Subscription};
pub use message::{Message, MessageAction, MessageEvent};
pub use messages::{MessageSubscription, Messages};
pub use occupancy::{Occupancy, OccupancyEvent};
pub use presence::{Presence, PresenceEvent, PresenceMember};
pub use queue::{OperationPriority, OperationQueue, PendingOperation, QueueMonitor};
pub use reactions::{Reaction, Reactions, SendReactionParams};
pub use room::Room;
pub use rooms::Rooms;
pub use single_flight::LatestJobExecutor;
pub use status::{RoomStatus, RoomStatusChange, StatusManager};
pub use system_env::SystemEnv;
pub use typing::{Typing, TypingChange, TypingEventKind, TypingSetEvent};
