mod link;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use duelsync_core::{
    ChannelTransport, ClockMode, EventRecorder, GameId, GameSession, GameState, MoveDelta,
    Payload, PlayerId, SessionConfig, SessionDriver, SessionEvent, SessionHandle, SyncError,
    TransportEvent, Value,
};
use duelsync_proto::StateSnapshot;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::FmtSubscriber;

use link::{LinkProfile, run_link};

/// Time a mover waits for the peer to catch up before pushing a snapshot.
const SETTLE_TIMEOUT: Duration = Duration::from_millis(300);
const MAX_PUSHES_PER_MOVE: u32 = 10;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ClockArg {
    Lamport,
    PerPlayer,
}

impl From<ClockArg> for ClockMode {
    fn from(arg: ClockArg) -> Self {
        match arg {
            ClockArg::Lamport => ClockMode::Lamport,
            ClockArg::PerPlayer => ClockMode::PerPlayer,
        }
    }
}

/// Two-peer game sync simulator
#[derive(Parser, Debug)]
#[command(name = "duelsync-sim")]
#[command(about = "Plays a two-player game over a lossy in-memory link", long_about = None)]
struct Args {
    /// Number of moves to play
    #[arg(short, long, default_value_t = 20)]
    moves: u32,

    /// Probability that a packet is dropped (0.0 - 1.0)
    #[arg(long, default_value_t = 0.1)]
    drop_rate: f64,

    /// Probability that a packet is swapped with its successor (0.0 - 1.0)
    #[arg(long, default_value_t = 0.2)]
    reorder_rate: f64,

    /// RNG seed for the link
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Drop the mover's transport after this many moves, then reconnect
    #[arg(long)]
    disconnect_after: Option<u32>,

    /// Logical clock strategy
    #[arg(long, value_enum, default_value_t = ClockArg::Lamport)]
    clock_mode: ClockArg,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

struct Peer {
    player: PlayerId,
    handle: SessionHandle,
    inbound: mpsc::Sender<TransportEvent>,
    recorder: Arc<EventRecorder>,
    task: tokio::task::JoinHandle<Result<GameSession, SyncError>>,
}

fn spawn_peer(
    player: &str,
    state: GameState,
    config: SessionConfig,
) -> anyhow::Result<(Peer, mpsc::Receiver<bytes::Bytes>)> {
    let player = PlayerId::from(player);
    let recorder = Arc::new(EventRecorder::new());
    let (transport, outbox) = ChannelTransport::pair(1024);
    let session = GameSession::new(
        state,
        player.clone(),
        config,
        Box::new(transport),
        recorder.clone(),
    )?;

    let (inbound, transport_rx) = mpsc::channel(1024);
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(1024);
    let (driver, handle) = SessionDriver::new(session, transport_rx, event_tx);
    let task = tokio::spawn(driver.run());

    let name = player.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            debug!(player = %name, ?event, "Session event");
        }
    });

    Ok((
        Peer {
            player,
            handle,
            inbound,
            recorder,
            task,
        },
        outbox,
    ))
}

async fn snapshots(a: &Peer, b: &Peer) -> anyhow::Result<(StateSnapshot, StateSnapshot)> {
    Ok((a.handle.snapshot().await?, b.handle.snapshot().await?))
}

/// Wait until both replicas agree, pushing the mover's snapshot whenever the
/// peer fails to catch up in time.
async fn settle(mover: &Peer, other: &Peer) -> anyhow::Result<bool> {
    for attempt in 0..=MAX_PUSHES_PER_MOVE {
        let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            let (left, right) = snapshots(mover, other).await?;
            if left.hash == right.hash {
                return Ok(true);
            }
            sleep(Duration::from_millis(10)).await;
        }
        if attempt < MAX_PUSHES_PER_MOVE {
            warn!(player = %mover.player, attempt, "Peer lagging, pushing snapshot");
            if let Err(e) = mover.handle.force_snapshot_push().await {
                warn!(error = %e, "Snapshot push failed");
            }
        }
    }
    Ok(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    for (name, rate) in [("drop-rate", args.drop_rate), ("reorder-rate", args.reorder_rate)] {
        if !(0.0..=1.0).contains(&rate) {
            anyhow::bail!("--{name} must be within 0.0..=1.0, got {rate}");
        }
    }

    let config = SessionConfig {
        clock_mode: args.clock_mode.into(),
        heartbeat_interval_ms: 500,
        reconnect_debounce_ms: 100,
        ..Default::default()
    };
    let state = GameState::new(
        GameId::from("sim"),
        vec![PlayerId::from("A"), PlayerId::from("B")],
        Payload::new(),
        0,
    )?;

    let (a, a_out) = spawn_peer("A", state.clone(), config.clone())?;
    let (b, b_out) = spawn_peer("B", state, config)?;
    let profile = LinkProfile {
        drop_rate: args.drop_rate,
        reorder_rate: args.reorder_rate,
    };
    let a_to_b = tokio::spawn(run_link("A->B", a_out, b.inbound.clone(), profile, args.seed));
    let b_to_a = tokio::spawn(run_link(
        "B->A",
        b_out,
        a.inbound.clone(),
        profile,
        args.seed.wrapping_add(1),
    ));

    info!(
        moves = args.moves,
        drop_rate = args.drop_rate,
        reorder_rate = args.reorder_rate,
        seed = args.seed,
        "Simulation started"
    );
    a.inbound.send(TransportEvent::Open).await?;
    b.inbound.send(TransportEvent::Open).await?;
    if !settle(&a, &b).await? {
        anyhow::bail!("peers never agreed on the opening state");
    }

    let mut stalls = 0;
    for n in 0..args.moves {
        let (view, _) = snapshots(&a, &b).await?;
        let (mover, other) = if view.current_turn == a.player {
            (&a, &b)
        } else {
            (&b, &a)
        };

        let disconnect = args.disconnect_after == Some(n);
        if disconnect {
            info!(player = %mover.player, "Dropping transport");
            mover.inbound.send(TransportEvent::Closed).await?;
        }

        let mut delta = Payload::new();
        delta.insert(format!("move_{n}"), Value::from(mover.player.as_str()));
        delta.insert("last".to_string(), Value::Int(i64::from(n)));
        match mover.handle.make_move(MoveDelta::Merge(delta.clone())).await {
            Err(SyncError::DivergenceUnresolved) => {
                warn!(player = %mover.player, "Mover untrusted, pushing snapshot before moving");
                mover.handle.force_snapshot_push().await?;
                mover.handle.make_move(MoveDelta::Merge(delta)).await?;
            }
            result => {
                result?;
            }
        }

        if disconnect {
            sleep(Duration::from_millis(150)).await;
            mover.inbound.send(TransportEvent::Reconnecting).await?;
            mover.inbound.send(TransportEvent::Open).await?;
            info!(player = %mover.player, "Transport restored");
        }

        if !settle(mover, other).await? {
            stalls += 1;
            warn!(move_number = n, "Peers did not converge after move");
        }
    }

    let (left, right) = snapshots(&a, &b).await?;
    let converged = left.hash == right.hash;
    let diverged_events = [&a, &b]
        .iter()
        .flat_map(|p| p.recorder.take())
        .filter(|e| matches!(e, SessionEvent::Diverged { .. }))
        .count();

    a.handle.close().await?;
    b.handle.close().await?;
    let _ = a.task.await?;
    let _ = b.task.await?;
    drop(a.inbound);
    drop(b.inbound);
    let a_stats = a_to_b.await?;
    let b_stats = b_to_a.await?;

    info!(
        turn = left.turn_number,
        hash_a = %left.hash.short(),
        hash_b = %right.hash.short(),
        converged,
        stalls,
        diverged_events,
        "Simulation finished"
    );
    info!(
        forwarded = a_stats.forwarded + b_stats.forwarded,
        dropped = a_stats.dropped + b_stats.dropped,
        reordered = a_stats.reordered + b_stats.reordered,
        "Link totals"
    );

    if !converged {
        anyhow::bail!("peers diverged: {} vs {}", left.hash, right.hash);
    }
    Ok(())
}
