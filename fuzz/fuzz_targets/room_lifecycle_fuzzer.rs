//! Fuzz target for the room lifecycle
//!
//! Drives arbitrary operation sequences through the reference model and a
//! real room over a scripted channel, on a paused clock.
//!
//! # Strategy
//!
//! - Application calls: attach, detach and release in any order
//! - Scripted failures: the next attach or detach fails in place, suspends
//!   or fails the channel
//! - Server changes: suspensions, resumed and non-resumed reattachments,
//!   channel failure
//! - Time: advance the clock so release retries and pending work run
//!
//! # Invariants
//!
//! - Real results and observable state match the model after every step
//! - No transition FROM `Released` (terminal invariant)
//! - Discontinuities never decrease
//! - NEVER panic on any operation order

#![no_main]

use arbitrary::Arbitrary;
use chatroom_core::RoomStatus;
use chatroom_harness::{ModelRoom, Operation, RoomDriver, SimEnv};
use libfuzzer_sys::fuzz_target;

/// Fuzz input with a seed for the simulated environment.
#[derive(Debug, Arbitrary)]
struct FuzzInput {
    /// Environment seed.
    seed: u64,
    /// Operation sequence to apply.
    operations: Vec<Operation>,
}

fuzz_target!(|input: FuzzInput| {
    let Ok(rt) =
        tokio::runtime::Builder::new_current_thread().enable_time().start_paused(true).build()
    else {
        return;
    };

    rt.block_on(async {
        let mut model = ModelRoom::new();
        let Ok(real) = RoomDriver::new(SimEnv::with_seed(input.seed)) else {
            return;
        };
        let mut discontinuities = 0;

        for op in input.operations.iter().take(64) {
            let was_released = model.status() == RoomStatus::Released;

            let model_result = model.apply(op);
            let real_result = real.apply(op).await;
            assert_eq!(model_result, real_result, "result divergence on {op:?}");

            let state = real.observable_state();
            assert_eq!(model.observable_state(), state, "state divergence after {op:?}");

            if was_released {
                assert_eq!(state.status, RoomStatus::Released);
            }
            assert!(state.discontinuities >= discontinuities);
            discontinuities = state.discontinuities;
        }
    });
});
