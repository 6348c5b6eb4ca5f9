//! Chat room simulation binary.
//!
//! Drives a scripted session through one room on virtual time: attach,
//! typing from both sides, messages, a reaction, a connection outage that
//! ends in a discontinuity, history and release. Every room event is logged.
//!
//! # Usage
//!
//! ```bash
//! # Default session
//! chatroom-sim
//!
//! # Different seed, short heartbeat throttle, verbose logs
//! chatroom-sim --seed 42 --throttle-ms 2000 --log-level debug
//! ```

use std::{sync::Arc, time::Duration};

use chatroom_core::{
    ChannelState, ErrorInfo, InboundMessage, QueryOptions, RoomOptions, Rooms, SendMessageParams,
    SendReactionParams, TypingOptions, room::channel_name,
    typing::{TYPING_STARTED, TYPING_STOPPED},
};
use chatroom_harness::{DEFAULT_SEED, MockChatService, MockRealtime, SimEnv};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chat room simulation
#[derive(Parser, Debug, Clone)]
#[command(name = "chatroom-sim")]
#[command(about = "Scripted chat room session on virtual time")]
#[command(version)]
struct Args {
    /// Room to join
    #[arg(short, long, default_value = "lobby")]
    room: String,

    /// Local client id
    #[arg(long, default_value = "alice")]
    client_id: String,

    /// Remote peer client id
    #[arg(long, default_value = "bob")]
    peer: String,

    /// Simulation seed
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Typing heartbeat throttle in milliseconds
    #[arg(long, default_value = "10000")]
    throttle_ms: u64,

    /// Extra time before a silent typer is dropped, in milliseconds
    #[arg(long, default_value = "2000")]
    typing_timeout_ms: u64,

    /// Local keystrokes to simulate
    #[arg(long, default_value = "20")]
    keystrokes: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(seed = args.seed, room = %args.room, "chatroom simulation starting");

    let mut sim = turmoil::Builder::new()
        .simulation_duration(Duration::from_secs(3600))
        .rng_seed(args.seed)
        .build();

    let host = args.client_id.clone();
    sim.client(host.as_str(), session(args));
    sim.run()?;

    tracing::info!("simulation finished");
    Ok(())
}

async fn session(args: Args) -> turmoil::Result {
    let env = SimEnv::with_seed(args.seed);
    let realtime = Arc::new(MockRealtime::new(args.client_id.clone()));
    let service =
        Arc::new(MockChatService::new(args.client_id.clone()).with_realtime(Arc::clone(&realtime)));
    let rooms = Rooms::new(env.clone(), Arc::clone(&realtime) as _, Arc::clone(&service) as _);

    let options = RoomOptions {
        typing: TypingOptions {
            heartbeat_throttle: Duration::from_millis(args.throttle_ms),
            timeout: Duration::from_millis(args.typing_timeout_ms),
        },
        ..RoomOptions::default()
    };
    let room = rooms.get(&args.room, options).await?;
    let channel = realtime
        .mock_channel(&channel_name(&args.room))
        .ok_or("room channel was not created")?;

    let _status = room.on_status_change(|change| match &change.error {
        Some(error) => {
            tracing::warn!(from = %change.previous, to = %change.current, %error, "room status");
        },
        None => tracing::info!(from = %change.previous, to = %change.current, "room status"),
    });
    let _discontinuity = room.on_discontinuity(|event| {
        tracing::warn!(error = %event.error, "discontinuity, refetching history");
    });
    let _messages = room.messages().subscribe(|event| {
        tracing::info!(
            kind = ?event.kind,
            from = %event.message.client_id,
            serial = %event.message.serial,
            text = %event.message.text,
            "message"
        );
    });
    let _typing = room.typing().subscribe(|event| {
        tracing::info!(
            client = %event.change.client_id,
            kind = ?event.change.kind,
            typers = event.current_typers.len(),
            "typing"
        );
    });
    let _reactions = room.reactions().subscribe(|reaction| {
        tracing::info!(
            name = %reaction.name,
            from = %reaction.client_id,
            own = reaction.is_self,
            "reaction"
        );
    });

    room.attach().await?;

    // The peer types for a while with jittered heartbeats, then goes quiet.
    let throttle = Duration::from_millis(args.throttle_ms);
    for _ in 0..3 {
        channel.deliver(typing_event(TYPING_STARTED, &args.peer));
        tokio::time::sleep(throttle / 2 + env.jitter(throttle / 2)).await;
    }
    service.seed_message(&args.room, &args.peer, "hello from the other side");

    for _ in 0..args.keystrokes {
        room.typing().keystroke().await?;
        let pause = Duration::from_millis(250) + env.jitter(Duration::from_millis(500));
        tokio::time::sleep(pause).await;
    }
    let sent = room
        .messages()
        .send(SendMessageParams { text: "hi everyone".to_string(), ..SendMessageParams::default() })
        .await?;
    tracing::debug!(serial = %sent.serial, "message accepted");
    room.typing().stop().await?;

    room.reactions()
        .send(SendReactionParams { name: "wave".to_string(), ..SendReactionParams::default() })
        .await?;
    channel.deliver(typing_event(TYPING_STOPPED, &args.peer));

    // Outage long enough that the channel cannot resume.
    channel.inject_state(
        ChannelState::Suspended,
        false,
        Some(ErrorInfo::new(80_003, 500, "connection suspended")),
    );
    service.seed_message(&args.room, &args.peer, "sent while you were away");
    tokio::time::sleep(Duration::from_secs(30)).await;
    channel.inject_state(ChannelState::Attached, false, None);
    tokio::time::sleep(Duration::from_millis(1)).await;

    let history = room.messages().history(&QueryOptions::default()).await?;
    tracing::info!(messages = history.items().len(), "history after reattach");

    rooms.release(&args.room).await;
    tracing::info!(
        status = %room.status(),
        published = channel.published().len(),
        requests = service.requests().len(),
        "session complete"
    );
    Ok(())
}

fn typing_event(name: &str, client_id: &str) -> InboundMessage {
    InboundMessage {
        name: name.to_string(),
        client_id: Some(client_id.to_string()),
        ..InboundMessage::default()
    }
}
