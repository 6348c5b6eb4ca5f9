//! Model-based property tests.
//!
//! These tests generate random operation sequences and verify that the real
//! room lifecycle behaves identically to the reference model.
//!
//! # Architecture
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!           ┌──────────────┼──────────────┐
//!           ▼              ▼              ▼
//!      ModelRoom      RoomDriver      Compare
//!      (reference)    (paused tokio)  Results
//! ```

use chatroom_core::RoomStatus;
use chatroom_harness::{FailureKind, ModelRoom, Operation, OperationResult, RoomDriver, SimEnv};
use proptest::prelude::*;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_time().start_paused(true).build().unwrap()
}

/// Strategy for generating failure kinds.
fn failure_strategy() -> impl Strategy<Value = FailureKind> {
    prop_oneof![
        Just(FailureKind::InPlace),
        Just(FailureKind::Suspended),
        Just(FailureKind::Failed),
    ]
}

/// Strategy for generating operations.
fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        // Weight towards the application calls
        5 => Just(Operation::Attach),
        3 => Just(Operation::Detach),
        1 => Just(Operation::Release),
        2 => failure_strategy().prop_map(|kind| Operation::FailNextAttach { kind }),
        2 => failure_strategy().prop_map(|kind| Operation::FailNextDetach { kind }),
        2 => Just(Operation::ChannelSuspended),
        3 => any::<bool>().prop_map(|resumed| Operation::ChannelReattach { resumed }),
        1 => Just(Operation::ChannelFailed),
        1 => (0..2_000u16).prop_map(|millis| Operation::AdvanceTime { millis }),
    ]
}

/// Run `ops` against both implementations, returning the first divergence.
fn run(seed: u64, ops: &[Operation]) -> Result<(), TestCaseError> {
    let rt = paused_runtime();
    rt.block_on(async {
        let mut model = ModelRoom::new();
        let real = RoomDriver::new(SimEnv::with_seed(seed)).unwrap();

        for (i, op) in ops.iter().enumerate() {
            let model_result = model.apply(op);
            let real_result = real.apply(op).await;

            prop_assert_eq!(
                &model_result,
                &real_result,
                "Divergence at operation {}: {:?}",
                i,
                op
            );
            prop_assert_eq!(
                model.observable_state(),
                real.observable_state(),
                "State divergence after operation {}: {:?}",
                i,
                op
            );
        }
        Ok(())
    })
}

proptest! {
    /// Verify that results and observable state match after every operation.
    #[test]
    fn prop_model_matches_real(
        seed in any::<u64>(),
        ops in prop::collection::vec(operation_strategy(), 0..40)
    ) {
        run(seed, &ops)?;
    }

    /// Released is terminal: nothing moves the room out of it.
    #[test]
    fn prop_released_is_terminal(
        ops in prop::collection::vec(operation_strategy(), 0..30)
    ) {
        let mut model = ModelRoom::new();
        model.apply(&Operation::Release);
        for op in &ops {
            model.apply(op);
            prop_assert_eq!(model.status(), RoomStatus::Released);
        }
        run(0, &[&[Operation::Release][..], &ops[..]].concat())?;
    }

    /// The first attach after creation never reports a discontinuity.
    #[test]
    fn prop_first_attach_is_continuous(
        failures in prop::collection::vec(failure_strategy(), 0..4)
    ) {
        let mut ops: Vec<Operation> =
            failures.into_iter().map(|kind| Operation::FailNextAttach { kind }).collect();
        ops.extend(std::iter::repeat_n(Operation::Attach, ops.len() + 1));

        let mut model = ModelRoom::new();
        for op in &ops {
            model.apply(op);
        }
        prop_assert_eq!(model.observable_state().discontinuities, 0);
        run(1, &ops)?;
    }
}

#[test]
fn attach_detach_attach_matches_model() {
    let ops = [Operation::Attach, Operation::Detach, Operation::Attach, Operation::Release];
    run(7, &ops).unwrap();

    let mut model = ModelRoom::new();
    let results: Vec<OperationResult> = ops.iter().map(|op| model.apply(op)).collect();
    assert!(results.iter().all(OperationResult::is_ok));
    assert_eq!(model.status(), RoomStatus::Released);
}

#[test]
fn release_through_failing_detaches_matches_model() {
    let ops = [
        Operation::Attach,
        Operation::FailNextDetach { kind: FailureKind::InPlace },
        Operation::FailNextDetach { kind: FailureKind::InPlace },
        Operation::FailNextDetach { kind: FailureKind::Suspended },
        Operation::Release,
    ];
    run(9, &ops).unwrap();
}
