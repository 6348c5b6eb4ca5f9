//! Real room driven by model operations.
//!
//! Mirrors [`ModelRoom`](crate::ModelRoom)'s interface over a real
//! [`Room`] whose channel is a [`MockChannel`]. Used by the model-based
//! tests and the lifecycle fuzzer.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chatroom_core::{
    Channel, ChannelState, ChatError, ErrorInfo, MessageSubscription, Room, RoomOptions,
    Subscription, room::channel_name,
};

use crate::{
    mock_channel::{MockChannel, Outcome},
    mock_realtime::MockRealtime,
    mock_service::MockChatService,
    model::{FailureKind, ObservableState, Operation, OperationResult},
    sim_env::SimEnv,
};

/// Room name used by the driver.
pub const DRIVER_ROOM: &str = "model-room";

const SETTLE: Duration = Duration::from_millis(1);

/// A real room plus the scripted channel underneath it.
pub struct RoomDriver {
    room: Room<SimEnv>,
    channel: Arc<MockChannel>,
    discontinuities: Arc<AtomicUsize>,
    _discontinuity: Subscription,
    _messages: MessageSubscription,
}

fn outcome(kind: FailureKind) -> Outcome {
    match kind {
        FailureKind::InPlace => Outcome::fail_in_place(),
        FailureKind::Suspended => Outcome::fail(ChannelState::Suspended),
        FailureKind::Failed => Outcome::fail(ChannelState::Failed),
    }
}

impl RoomDriver {
    /// Build a room with default options. Must be called inside a tokio
    /// runtime.
    pub fn new(env: SimEnv) -> Result<Self, ChatError> {
        let realtime = MockRealtime::new("driver");
        let service = Arc::new(MockChatService::new("driver"));
        let room = Room::new(env, DRIVER_ROOM, RoomOptions::default(), &realtime, service)?;
        let channel = realtime
            .mock_channel(&channel_name(DRIVER_ROOM))
            .ok_or_else(|| ChatError::InvalidArgument("room channel was not created".to_string()))?;

        let discontinuities = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&discontinuities);
        let discontinuity = room.on_discontinuity(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let messages = room.messages().subscribe(|_| {});

        Ok(Self {
            room,
            channel,
            discontinuities,
            _discontinuity: discontinuity,
            _messages: messages,
        })
    }

    /// The room under test.
    pub fn room(&self) -> &Room<SimEnv> {
        &self.room
    }

    /// The scripted channel.
    pub fn channel(&self) -> &MockChannel {
        &self.channel
    }

    /// Apply an operation to the real room.
    pub async fn apply(&self, op: &Operation) -> OperationResult {
        match *op {
            Operation::Attach => self.room.attach().await.into(),
            Operation::Detach => self.room.detach().await.into(),
            Operation::Release => {
                self.room.release().await;
                OperationResult::Ok
            },
            Operation::FailNextAttach { kind } => {
                self.channel.script_attach(outcome(kind));
                OperationResult::Ok
            },
            Operation::FailNextDetach { kind } => {
                self.channel.script_detach(outcome(kind));
                OperationResult::Ok
            },
            Operation::ChannelSuspended => {
                let reason = ErrorInfo::new(80_002, 500, "connection suspended");
                self.inject(ChannelState::Suspended, false, Some(reason)).await
            },
            Operation::ChannelReattach { resumed } => {
                self.inject(ChannelState::Attached, resumed, None).await
            },
            Operation::ChannelFailed => {
                let reason = ErrorInfo::new(90_010, 500, "channel failed");
                self.inject(ChannelState::Failed, false, Some(reason)).await
            },
            Operation::AdvanceTime { millis } => {
                tokio::time::sleep(Duration::from_millis(u64::from(millis))).await;
                OperationResult::Ok
            },
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState {
            status: self.room.status(),
            channel: self.channel.state(),
            discontinuities: self.discontinuities.load(Ordering::SeqCst),
            disposed: self.room.messages().subscriber_count() == 0,
        }
    }

    /// Inject a service-side change and let the room's handler consume it.
    async fn inject(
        &self,
        current: ChannelState,
        resumed: bool,
        reason: Option<ErrorInfo>,
    ) -> OperationResult {
        self.channel.inject_state(current, resumed, reason);
        tokio::time::sleep(SETTLE).await;
        OperationResult::Ok
    }
}

impl fmt::Debug for RoomDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomDriver")
            .field("room", &self.room)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
