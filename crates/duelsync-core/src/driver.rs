//! Tokio task owning one [`GameSession`].
//!
//! The driver is the single mutation point for its session: transport
//! signals, caller commands and timer ticks are serialized through one
//! `select!` loop. Inbound transport traffic is polled first.

use std::time::Duration;

use bytes::Bytes;
use duelsync_proto::{MoveDelta, Payload, PlayerId, StateSnapshot};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::events::SessionEvent;
use crate::recovery::RecoverySnapshot;
use crate::session::GameSession;

/// Upper bound on the driver's timer resolution.
const MAX_TICK: Duration = Duration::from_millis(250);

/// Signals from the owner of the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Open,
    Closed,
    /// Renegotiation started after `ReconnectDue`.
    Reconnecting,
    Message(Bytes),
}

pub type MoveTransform = Box<dyn FnOnce(&Payload) -> Payload + Send>;

pub enum SessionCommand {
    MakeMove {
        delta: MoveDelta,
        reply: oneshot::Sender<Result<StateSnapshot, SyncError>>,
    },
    MakeMoveWith {
        transform: MoveTransform,
        reply: oneshot::Sender<Result<StateSnapshot, SyncError>>,
    },
    SetTurn {
        player: PlayerId,
        reply: oneshot::Sender<Result<StateSnapshot, SyncError>>,
    },
    ForceSnapshotPush {
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    Snapshot {
        reply: oneshot::Sender<StateSnapshot>,
    },
    Recovery {
        now_ms: u64,
        reply: oneshot::Sender<RecoverySnapshot>,
    },
    Close,
}

impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionCommand::MakeMove { .. } => "MakeMove",
            SessionCommand::MakeMoveWith { .. } => "MakeMoveWith",
            SessionCommand::SetTurn { .. } => "SetTurn",
            SessionCommand::ForceSnapshotPush { .. } => "ForceSnapshotPush",
            SessionCommand::Snapshot { .. } => "Snapshot",
            SessionCommand::Recovery { .. } => "Recovery",
            SessionCommand::Close => "Close",
        };
        f.write_str(name)
    }
}

/// Cloneable front end to a running [`SessionDriver`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| SyncError::ChannelSend)?;
        rx.await.map_err(|_| SyncError::ChannelRecv)
    }

    pub async fn make_move(&self, delta: MoveDelta) -> Result<StateSnapshot, SyncError> {
        self.request(|reply| SessionCommand::MakeMove { delta, reply })
            .await?
    }

    pub async fn make_move_with<F>(&self, transform: F) -> Result<StateSnapshot, SyncError>
    where
        F: FnOnce(&Payload) -> Payload + Send + 'static,
    {
        let transform: MoveTransform = Box::new(transform);
        self.request(|reply| SessionCommand::MakeMoveWith { transform, reply })
            .await?
    }

    pub async fn set_turn(&self, player: PlayerId) -> Result<StateSnapshot, SyncError> {
        self.request(|reply| SessionCommand::SetTurn { player, reply })
            .await?
    }

    pub async fn force_snapshot_push(&self) -> Result<(), SyncError> {
        self.request(|reply| SessionCommand::ForceSnapshotPush { reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<StateSnapshot, SyncError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    pub async fn recovery_snapshot(&self, now_ms: u64) -> Result<RecoverySnapshot, SyncError> {
        self.request(|reply| SessionCommand::Recovery { now_ms, reply })
            .await
    }

    pub async fn close(&self) -> Result<(), SyncError> {
        self.tx
            .send(SessionCommand::Close)
            .await
            .map_err(|_| SyncError::ChannelSend)
    }

    /// `true` once the driver task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct SessionDriver {
    session: GameSession,
    transport_rx: mpsc::Receiver<TransportEvent>,
    command_rx: mpsc::Receiver<SessionCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
    tick: Duration,
}

impl SessionDriver {
    /// Wrap a session. Events are forwarded to `event_tx`; a dropped
    /// receiver is tolerated.
    pub fn new(
        session: GameSession,
        transport_rx: mpsc::Receiver<TransportEvent>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::channel(32);
        let tick = session
            .config()
            .heartbeat_interval()
            .min(MAX_TICK)
            .max(Duration::from_millis(1));
        (
            Self {
                session,
                transport_rx,
                command_rx: rx,
                event_tx,
                tick,
            },
            SessionHandle { tx },
        )
    }

    /// Run until closed. Returns the session so its final state can be
    /// inspected or persisted.
    pub async fn run(mut self) -> Result<GameSession, SyncError> {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(game_id = %self.session.game_id(), "Session driver started");

        loop {
            tokio::select! {
                biased;

                event = self.transport_rx.recv() => {
                    let now = Instant::now().into_std();
                    match event {
                        Some(TransportEvent::Message(bytes)) => {
                            if let Err(e) = self.session.handle_message(&bytes, now) {
                                warn!(error = %e, "Inbound message handling failed");
                            }
                        }
                        Some(TransportEvent::Open) => {
                            if let Err(e) = self.session.on_transport_open(now) {
                                warn!(error = %e, "Open handling failed");
                            }
                        }
                        Some(TransportEvent::Closed) => {
                            self.session.on_transport_close(now);
                        }
                        Some(TransportEvent::Reconnecting) => {
                            self.session.begin_reconnect(now);
                        }
                        None => {
                            debug!("Transport event channel closed");
                            self.session.close();
                        }
                    }
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            debug!("All session handles dropped");
                            self.session.close();
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.session.tick(Instant::now().into_std());
                }
            }

            self.forward_events().await;
            if self.session.connection().is_closed() {
                info!(game_id = %self.session.game_id(), "Session driver stopped");
                return Ok(self.session);
            }
        }
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        let now = Instant::now().into_std();
        debug!(command = ?cmd, "Session command");
        match cmd {
            SessionCommand::MakeMove { delta, reply } => {
                let result = self
                    .session
                    .make_move(delta, now)
                    .map(|state| state.to_snapshot());
                let _ = reply.send(result);
            }
            SessionCommand::MakeMoveWith { transform, reply } => {
                let result = self
                    .session
                    .make_move_with(transform, now)
                    .map(|state| state.to_snapshot());
                let _ = reply.send(result);
            }
            SessionCommand::SetTurn { player, reply } => {
                let result = self
                    .session
                    .set_turn(player, now)
                    .map(|state| state.to_snapshot());
                let _ = reply.send(result);
            }
            SessionCommand::ForceSnapshotPush { reply } => {
                let _ = reply.send(self.session.force_snapshot_push());
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.session.state().to_snapshot());
            }
            SessionCommand::Recovery { now_ms, reply } => {
                let _ = reply.send(self.session.recovery_snapshot(now_ms));
            }
            SessionCommand::Close => {
                self.session.close();
            }
        }
    }

    async fn forward_events(&mut self) {
        for event in self.session.take_events() {
            if self.event_tx.send(event).await.is_err() {
                // Observer went away; events are still delivered to hooks.
                break;
            }
        }
    }
}
