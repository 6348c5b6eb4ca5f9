//! Deterministic test harness for the chat room SDK.
//!
//! In-memory doubles for the realtime client and the chat REST service, a
//! seeded [`SimEnv`] for turmoil and paused-clock runs, and a reference model
//! of the room lifecycle.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation of the room
//! lifecycle. Operations are applied to both the model and a real room over a
//! [`MockChannel`], and their observable states are compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod driver;
pub mod mock_channel;
pub mod mock_realtime;
pub mod mock_service;
pub mod model;
pub mod sim_env;

pub use driver::{DRIVER_ROOM, RoomDriver};
pub use mock_channel::{INITIAL_SERIAL, MockChannel, Outcome};
pub use mock_realtime::MockRealtime;
pub use mock_service::MockChatService;
pub use model::{
    FailureKind, ModelRoom, ObservableState, Operation, OperationError, OperationResult,
};
pub use sim_env::{DEFAULT_SEED, SimEnv};
