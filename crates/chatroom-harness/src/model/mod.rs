//! Reference model for model-based testing.
//!
//! The model is a simplified room lifecycle with no tasks, queue or
//! channels. It serves as the oracle against which the real room is
//! verified.
//!
//! # Design Principles
//!
//! - Simplicity: the model should be obviously correct
//! - Deterministic: same operations produce the same state
//! - Observable: only what an application can see is compared

pub mod operation;
mod room;

pub use operation::{FailureKind, Operation, OperationError, OperationResult};
pub use room::{ModelRoom, ObservableState};
