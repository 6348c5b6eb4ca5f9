//! Room lifecycle properties.
//!
//! Drives a [`RoomLifecycleManager`] over a [`MockChannel`] on a paused
//! tokio clock. Sleeping a millisecond lets every spawned task run to its
//! next await point before the test looks at the room.

use std::{sync::Arc, time::Duration};

use chatroom_core::{
    Channel, ChannelOptions, ChannelState, ChatError, DiscontinuityEmitter, ErrorCode, ErrorInfo,
    Environment, RELEASE_RETRY_DELAY, RoomFeature, RoomLifecycleManager, RoomStatus,
    StatusManager,
};
use chatroom_harness::{MockChannel, Outcome, SimEnv};
use parking_lot::Mutex;

struct RecordingFeature {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl RoomFeature for RecordingFeature {
    fn feature_name(&self) -> &'static str {
        self.name
    }

    fn dispose(&self) {
        self.log.lock().push(self.name);
    }
}

struct Fixture {
    env: SimEnv,
    channel: Arc<MockChannel>,
    status: Arc<StatusManager>,
    manager: Arc<RoomLifecycleManager<SimEnv>>,
    statuses: Arc<Mutex<Vec<RoomStatus>>>,
    discontinuities: Arc<Mutex<Vec<ErrorInfo>>>,
    disposed: Arc<Mutex<Vec<&'static str>>>,
}

impl Fixture {
    fn new() -> Self {
        let env = SimEnv::with_seed(42);
        let channel =
            Arc::new(MockChannel::new("lobby::$chat", "alice", ChannelOptions::default()));
        let status = Arc::new(StatusManager::new());
        let discontinuity = Arc::new(DiscontinuityEmitter::new());

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&statuses);
        let _ = status.on_change(move |change| seen.lock().push(change.current));

        let discontinuities = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&discontinuities);
        let _ = discontinuity.on(move |event| seen.lock().push(event.error.clone()));

        let manager = Arc::new(RoomLifecycleManager::new(
            env.clone(),
            "lobby",
            Arc::clone(&channel) as Arc<dyn Channel>,
            Arc::clone(&status),
            discontinuity,
        ));

        let disposed = Arc::new(Mutex::new(Vec::new()));
        for name in ["messages", "presence", "typing"] {
            let feature = RecordingFeature { name, log: Arc::clone(&disposed) };
            manager.register_feature(Arc::new(feature));
        }

        Self { env, channel, status, manager, statuses, discontinuities, disposed }
    }

    fn take_statuses(&self) -> Vec<RoomStatus> {
        std::mem::take(&mut *self.statuses.lock())
    }

    fn discontinuity_count(&self) -> usize {
        self.discontinuities.lock().len()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn attach_then_release_reports_statuses_in_order() {
    let f = Fixture::new();

    f.manager.attach().await.unwrap();
    assert_eq!(f.take_statuses(), vec![RoomStatus::Attaching, RoomStatus::Attached]);

    f.manager.release().await;
    assert_eq!(f.take_statuses(), vec![RoomStatus::Releasing, RoomStatus::Released]);
    assert_eq!(*f.disposed.lock(), vec!["messages", "presence", "typing"]);
    assert_eq!(f.channel.release_calls(), 1);
    assert_eq!(f.manager.feature_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn second_release_is_a_no_op() {
    let f = Fixture::new();
    f.manager.attach().await.unwrap();

    f.manager.release().await;
    f.take_statuses();
    f.manager.release().await;

    assert!(f.take_statuses().is_empty());
    assert_eq!(f.disposed.lock().len(), 3);
    assert_eq!(f.channel.release_calls(), 1);
    assert_eq!(f.channel.detach_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn release_from_initialized_skips_detach() {
    let f = Fixture::new();

    f.manager.release().await;

    assert_eq!(f.status.status(), RoomStatus::Released);
    assert_eq!(f.take_statuses(), vec![RoomStatus::Released]);
    assert_eq!(f.channel.detach_calls(), 0);
    assert_eq!(f.channel.release_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn attach_on_attached_makes_no_channel_call() {
    let f = Fixture::new();
    f.manager.attach().await.unwrap();
    f.take_statuses();

    f.manager.attach().await.unwrap();

    assert_eq!(f.channel.attach_calls(), 1);
    assert!(f.take_statuses().is_empty());
}

#[tokio::test(start_paused = true)]
async fn detach_on_failed_fails_without_channel_call() {
    let f = Fixture::new();
    f.channel.script_attach(Outcome::fail(ChannelState::Failed));

    let err = f.manager.attach().await.unwrap_err();
    assert!(matches!(err, ChatError::Channel { .. }));
    assert_eq!(f.status.status(), RoomStatus::Failed);

    let err = f.manager.detach().await.unwrap_err();
    assert!(matches!(err, ChatError::RoomInFailedState));
    assert_eq!(err.code(), ErrorCode::RoomInFailedState.as_u32());
    assert_eq!(f.channel.detach_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn attach_and_detach_on_released_room_are_rejected() {
    let f = Fixture::new();
    f.manager.release().await;

    assert!(matches!(f.manager.attach().await, Err(ChatError::RoomIsReleased)));
    assert!(matches!(f.manager.detach().await, Err(ChatError::RoomIsReleased)));
    assert_eq!(f.channel.attach_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn release_preempts_queued_operation_but_not_running_one() {
    let f = Fixture::new();
    let gate = f.channel.hold_next_attach();

    let manager = Arc::clone(&f.manager);
    let attach = tokio::spawn(async move { manager.attach().await });
    settle().await;
    assert_eq!(f.status.status(), RoomStatus::Attaching);

    let manager = Arc::clone(&f.manager);
    let detach = tokio::spawn(async move { manager.detach().await });
    settle().await;

    let manager = Arc::clone(&f.manager);
    let release = tokio::spawn(async move { manager.release().await });
    settle().await;

    // The running attach is not preempted.
    assert_eq!(f.status.status(), RoomStatus::Attaching);
    assert!(!f.manager.is_idle());

    gate.send(()).unwrap();
    attach.await.unwrap().unwrap();
    release.await.unwrap();
    let detached = detach.await.unwrap();

    assert!(matches!(detached, Err(ChatError::RoomIsReleased)));
    assert_eq!(
        f.take_statuses(),
        vec![
            RoomStatus::Attaching,
            RoomStatus::Attached,
            RoomStatus::Releasing,
            RoomStatus::Released,
        ]
    );
    // Only the release detached the channel.
    assert_eq!(f.channel.detach_calls(), 1);
    assert!(f.manager.is_idle());
}

#[tokio::test(start_paused = true)]
async fn operations_run_one_at_a_time() {
    let f = Fixture::new();
    let gate = f.channel.hold_next_attach();

    let manager = Arc::clone(&f.manager);
    let attach = tokio::spawn(async move { manager.attach().await });
    settle().await;

    let manager = Arc::clone(&f.manager);
    let detach = tokio::spawn(async move { manager.detach().await });
    settle().await;

    // The detach is queued behind the held attach.
    assert_eq!(f.channel.detach_calls(), 0);

    gate.send(()).unwrap();
    attach.await.unwrap().unwrap();
    detach.await.unwrap().unwrap();

    assert_eq!(f.channel.detach_calls(), 1);
    assert_eq!(f.status.status(), RoomStatus::Detached);
}

#[tokio::test(start_paused = true)]
async fn first_attach_is_not_a_discontinuity() {
    let f = Fixture::new();

    f.manager.attach().await.unwrap();
    settle().await;

    assert_eq!(f.discontinuity_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn non_resumed_reattach_reports_one_discontinuity() {
    let f = Fixture::new();
    f.manager.attach().await.unwrap();

    let reason = ErrorInfo::new(80_002, 500, "connection suspended");
    f.channel.inject_state(ChannelState::Suspended, false, Some(reason.clone()));
    settle().await;
    assert_eq!(f.status.status(), RoomStatus::Suspended);
    assert_eq!(f.status.error(), Some(reason));

    let reattach = ErrorInfo::new(80_008, 500, "unable to resume");
    f.channel.inject_state(ChannelState::Attached, false, Some(reattach.clone()));
    settle().await;

    let seen = f.discontinuities.lock().clone();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].has_code(ErrorCode::RoomDiscontinuity));
    assert_eq!(seen[0].cause.as_deref(), Some(&reattach));
    assert_eq!(f.status.status(), RoomStatus::Attached);
}

#[tokio::test(start_paused = true)]
async fn resumed_reattach_is_continuous() {
    let f = Fixture::new();
    f.manager.attach().await.unwrap();

    f.channel.inject_state(ChannelState::Suspended, false, None);
    f.channel.inject_state(ChannelState::Attached, true, None);
    settle().await;

    assert_eq!(f.discontinuity_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn attached_update_without_resume_is_a_discontinuity() {
    let f = Fixture::new();
    f.manager.attach().await.unwrap();
    f.take_statuses();

    f.channel.inject_state(ChannelState::Attached, false, None);
    settle().await;

    assert_eq!(f.discontinuity_count(), 1);
    // Same-state updates do not touch the status.
    assert!(f.take_statuses().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reattach_after_explicit_detach_is_continuous() {
    let f = Fixture::new();
    f.manager.attach().await.unwrap();
    f.manager.detach().await.unwrap();
    f.manager.attach().await.unwrap();
    settle().await;

    assert_eq!(f.discontinuity_count(), 0);

    // Continuity tracking resumes once attached again.
    f.channel.inject_state(ChannelState::Attached, false, None);
    settle().await;
    assert_eq!(f.discontinuity_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn discontinuity_fires_while_operation_in_flight() {
    let f = Fixture::new();
    f.manager.attach().await.unwrap();
    f.channel.inject_state(ChannelState::Suspended, false, None);
    settle().await;

    let gate = f.channel.hold_next_attach();
    let manager = Arc::clone(&f.manager);
    let attach = tokio::spawn(async move { manager.attach().await });
    settle().await;

    gate.send(()).unwrap();
    attach.await.unwrap().unwrap();

    assert_eq!(f.discontinuity_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn channel_changes_are_not_mapped_while_operation_in_flight() {
    let f = Fixture::new();
    let gate = f.channel.hold_next_attach();

    let manager = Arc::clone(&f.manager);
    let attach = tokio::spawn(async move { manager.attach().await });
    settle().await;

    f.channel.inject_state(ChannelState::Suspended, false, None);
    settle().await;
    assert_eq!(f.status.status(), RoomStatus::Attaching);

    gate.send(()).unwrap();
    attach.await.unwrap().unwrap();
    assert_eq!(f.take_statuses(), vec![RoomStatus::Attaching, RoomStatus::Attached]);
}

#[tokio::test(start_paused = true)]
async fn attach_failure_takes_status_from_channel() {
    let f = Fixture::new();
    f.channel.script_attach(Outcome::fail(ChannelState::Suspended));

    let err = f.manager.attach().await.unwrap_err();

    assert!(err.to_string().starts_with("failed to attach room lobby"));
    assert_eq!(f.status.status(), RoomStatus::Suspended);
    assert!(f.status.error().is_some());
    assert!(!err.is_terminal());
}

#[tokio::test(start_paused = true)]
async fn detach_failure_in_place_restores_status() {
    let f = Fixture::new();
    f.manager.attach().await.unwrap();
    f.channel.script_detach(Outcome::fail_in_place());

    let err = f.manager.detach().await.unwrap_err();

    assert!(err.to_string().starts_with("failed to detach room lobby"));
    assert_eq!(f.status.status(), RoomStatus::Attached);
    // Reverting to attached is resumed; no discontinuity.
    assert_eq!(f.discontinuity_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn release_retries_detach_every_250ms() {
    let f = Fixture::new();
    f.manager.attach().await.unwrap();
    f.channel.script_detach(Outcome::fail_in_place());
    f.channel.script_detach(Outcome::fail_in_place());

    let start = f.env.now();
    f.manager.release().await;

    let elapsed = f.env.elapsed_since(start);
    assert!(elapsed >= RELEASE_RETRY_DELAY * 2);
    assert!(elapsed < RELEASE_RETRY_DELAY * 3);
    assert_eq!(f.channel.detach_calls(), 3);
    assert_eq!(f.status.status(), RoomStatus::Released);
    assert_eq!(f.disposed.lock().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn release_gives_up_detaching_when_channel_fails() {
    let f = Fixture::new();
    f.manager.attach().await.unwrap();
    f.channel.script_detach(Outcome::fail(ChannelState::Failed));

    f.manager.release().await;

    assert_eq!(f.channel.detach_calls(), 1);
    assert_eq!(f.status.status(), RoomStatus::Released);
}

#[tokio::test(start_paused = true)]
async fn release_from_failed_skips_detach() {
    let f = Fixture::new();
    f.manager.attach().await.unwrap();
    f.channel.inject_state(ChannelState::Failed, false, Some(ErrorInfo::new(90_010, 500, "boom")));
    settle().await;
    assert_eq!(f.status.status(), RoomStatus::Failed);

    f.manager.release().await;

    assert_eq!(f.channel.detach_calls(), 0);
    assert_eq!(f.status.status(), RoomStatus::Released);
}

#[tokio::test(start_paused = true)]
async fn released_room_ignores_channel_changes() {
    let f = Fixture::new();
    f.manager.attach().await.unwrap();
    f.manager.release().await;
    f.take_statuses();

    f.channel.inject_state(ChannelState::Suspended, false, None);
    f.channel.inject_state(ChannelState::Attached, false, None);
    settle().await;

    assert_eq!(f.status.status(), RoomStatus::Released);
    assert!(f.take_statuses().is_empty());
    assert_eq!(f.discontinuity_count(), 0);
}
