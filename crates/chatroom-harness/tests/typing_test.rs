//! Typing indicators through a full room.
//!
//! Paused-clock tests for heartbeat throttling and peer pruning, plus a
//! turmoil simulation of two peers typing over virtual time.

use std::{sync::Arc, time::Duration};

use chatroom_core::{
    ChatError, InboundMessage, Room, RoomOptions, RoomStatus, TypingEventKind, TypingOptions,
    TypingSetEvent, room::channel_name,
    typing::{TYPING_STARTED, TYPING_STOPPED},
};
use chatroom_harness::{MockChannel, MockChatService, MockRealtime, SimEnv};
use parking_lot::Mutex;

const ROOM: &str = "lobby";

fn room_with(typing: TypingOptions) -> (Room<SimEnv>, Arc<MockChannel>) {
    let realtime = MockRealtime::new("alice");
    let service = Arc::new(MockChatService::new("alice"));
    let options = RoomOptions { typing, ..RoomOptions::default() };
    let room = Room::new(SimEnv::new(), ROOM, options, &realtime, service).unwrap();
    let channel = realtime.mock_channel(&channel_name(ROOM)).unwrap();
    (room, channel)
}

fn typing_event(name: &str, client_id: &str) -> InboundMessage {
    InboundMessage {
        name: name.to_string(),
        client_id: Some(client_id.to_string()),
        ..InboundMessage::default()
    }
}

fn record(room: &Room<SimEnv>) -> Arc<Mutex<Vec<TypingSetEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    let _ = room.typing().subscribe(move |event| seen.lock().push(event.clone()));
    events
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn keystrokes_within_throttle_publish_once() {
    let (room, channel) = room_with(TypingOptions::default());
    room.attach().await.unwrap();

    room.typing().keystroke().await.unwrap();
    room.typing().keystroke().await.unwrap();
    room.typing().keystroke().await.unwrap();
    assert_eq!(channel.published_names(), vec![TYPING_STARTED]);

    room.typing().stop().await.unwrap();
    assert_eq!(channel.published_names(), vec![TYPING_STARTED, TYPING_STOPPED]);

    // Stopping cleared the heartbeat, so the next keystroke publishes at once.
    room.typing().keystroke().await.unwrap();
    assert_eq!(channel.published_names(), vec![TYPING_STARTED, TYPING_STOPPED, TYPING_STARTED]);
    assert!(channel.published().iter().all(|m| m.ephemeral));
}

#[tokio::test(start_paused = true)]
async fn calls_superseded_while_waiting_for_attach_are_skipped() {
    let (room, channel) = room_with(TypingOptions::default());
    let gate = channel.hold_next_attach();

    let (attached, (first, second, stopped, ())) = tokio::join!(room.attach(), async {
        settle().await;
        assert_eq!(room.status(), RoomStatus::Attaching);
        tokio::join!(
            room.typing().keystroke(),
            room.typing().keystroke(),
            room.typing().stop(),
            async move {
                settle().await;
                gate.send(()).unwrap();
            },
        )
    });

    attached.unwrap();
    first.unwrap();
    second.unwrap();
    stopped.unwrap();
    // The first keystroke was already running; the second was superseded by
    // the stop before it started.
    assert_eq!(channel.published_names(), vec![TYPING_STARTED, TYPING_STOPPED]);

    room.typing().keystroke().await.unwrap();
    assert_eq!(channel.published_names(), vec![TYPING_STARTED, TYPING_STOPPED, TYPING_STARTED]);
}

#[tokio::test(start_paused = true)]
async fn keystroke_after_throttle_publishes_again() {
    let (room, channel) = room_with(TypingOptions::default());
    room.attach().await.unwrap();

    room.typing().keystroke().await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    room.typing().keystroke().await.unwrap();

    assert_eq!(channel.published_names(), vec![TYPING_STARTED, TYPING_STARTED]);
}

#[tokio::test(start_paused = true)]
async fn stop_without_heartbeat_is_a_no_op() {
    let (room, channel) = room_with(TypingOptions::default());
    room.attach().await.unwrap();

    room.typing().stop().await.unwrap();
    room.typing().keystroke().await.unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;
    room.typing().stop().await.unwrap();

    assert_eq!(channel.published_names(), vec![TYPING_STARTED]);
}

#[tokio::test(start_paused = true)]
async fn keystroke_on_detached_room_fails() {
    let (room, channel) = room_with(TypingOptions::default());

    let err = room.typing().keystroke().await.unwrap_err();

    assert!(matches!(err, ChatError::RoomInInvalidState { status: RoomStatus::Initialized }));
    assert!(channel.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn silent_peer_is_pruned_once() {
    let (room, channel) = room_with(TypingOptions::default());
    let events = record(&room);

    channel.deliver(typing_event(TYPING_STARTED, "bob"));
    settle().await;
    assert!(room.typing().current().contains("bob"));

    tokio::time::sleep(Duration::from_secs(12)).await;

    assert!(room.typing().current().is_empty());
    let kinds: Vec<TypingEventKind> = events.lock().iter().map(|e| e.change.kind).collect();
    assert_eq!(kinds, vec![TypingEventKind::Started, TypingEventKind::Stopped]);

    // Nothing else fires later.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(events.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn repeated_heartbeat_postpones_pruning() {
    let (room, channel) = room_with(TypingOptions::default());
    let events = record(&room);

    channel.deliver(typing_event(TYPING_STARTED, "bob"));
    tokio::time::sleep(Duration::from_secs(10)).await;
    channel.deliver(typing_event(TYPING_STARTED, "bob"));
    tokio::time::sleep(Duration::from_secs(10)).await;

    // 20 s after the first heartbeat, 10 s after the second.
    assert!(room.typing().current().contains("bob"));
    assert_eq!(events.lock().len(), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(room.typing().current().is_empty());
    assert_eq!(events.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn explicit_stop_cancels_pruning() {
    let (room, channel) = room_with(TypingOptions::default());
    let events = record(&room);

    channel.deliver(typing_event(TYPING_STARTED, "bob"));
    channel.deliver(typing_event(TYPING_STOPPED, "bob"));
    // Unknown peers stopping do not emit.
    channel.deliver(typing_event(TYPING_STOPPED, "carol"));
    tokio::time::sleep(Duration::from_secs(30)).await;

    let kinds: Vec<TypingEventKind> = events.lock().iter().map(|e| e.change.kind).collect();
    assert_eq!(kinds, vec![TypingEventKind::Started, TypingEventKind::Stopped]);
}

#[tokio::test(start_paused = true)]
async fn events_carry_the_full_typing_set() {
    let (room, channel) = room_with(TypingOptions::default());
    let events = record(&room);

    channel.deliver(typing_event(TYPING_STARTED, "bob"));
    channel.deliver(typing_event(TYPING_STARTED, "carol"));
    settle().await;

    let last = events.lock().last().cloned().unwrap();
    assert_eq!(last.change.client_id, "carol");
    assert_eq!(last.current_typers.len(), 2);
    assert!(last.current_typers.contains("bob"));
}

#[tokio::test(start_paused = true)]
async fn release_stops_typing_timers() {
    let (room, channel) = room_with(TypingOptions::default());
    let events = record(&room);

    channel.deliver(typing_event(TYPING_STARTED, "bob"));
    settle().await;
    room.release().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(events.lock().len(), 1);
    assert!(room.typing().current().is_empty());
}

#[test]
fn typing_timeouts_under_simulation() {
    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(120))
        .rng_seed(2024)
        .build();

    sim.client("alice", async {
        let options = TypingOptions {
            heartbeat_throttle: Duration::from_secs(3),
            timeout: Duration::from_secs(1),
        };
        let (room, channel) = room_with(options);
        let events = record(&room);
        room.attach().await?;

        // Bob heartbeats every 3 s for 12 s, then goes silent.
        for _ in 0..4 {
            channel.deliver(typing_event(TYPING_STARTED, "bob"));
            tokio::time::sleep(Duration::from_secs(3)).await;
            assert!(room.typing().current().contains("bob"));
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(room.typing().current().is_empty());

        // Alice types every 700 ms for 7 s: heartbeats at 0 s, 3.5 s and 7 s.
        for _ in 0..11 {
            room.typing().keystroke().await?;
            tokio::time::sleep(Duration::from_millis(700)).await;
        }
        let started = channel.published_names().iter().filter(|n| *n == TYPING_STARTED).count();
        assert_eq!(started, 3);

        let kinds: Vec<TypingEventKind> = events.lock().iter().map(|e| e.change.kind).collect();
        assert_eq!(kinds, vec![TypingEventKind::Started, TypingEventKind::Stopped]);

        room.release().await;
        Ok(())
    });

    sim.run().unwrap();
}
