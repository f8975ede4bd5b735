//! One game session: the single mutation point for a game's state.
//!
//! Inbound messages, timer ticks and local moves all go through `&mut
//! GameSession`, so the reducer never sees concurrent mutation. The session
//! is sans-io: the caller feeds transport signals and the current instant,
//! and outbound bytes go through the [`Transport`] it was built with.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use duelsync_proto::{
    Action, Envelope, GameId, MoveDelta, Payload, PlayerId, StateHash, StateSnapshot,
    messages::{
        presence::{Ping, Pong},
        signal::IceCandidate,
        sync::{ActionError, ActionErrorCode, ActionMsg, RequestResync, SnapshotMsg},
    },
};
use tracing::{debug, error, info, trace, warn};

use crate::action_log::{ActionLog, ActionLogEntry};
use crate::clock::stamp;
use crate::config::SessionConfig;
use crate::connection::{ConnectionSession, ConnectionState, PresenceLevel};
use crate::error::SyncError;
use crate::events::SessionEvent;
use crate::hooks::{HookDecision, ProposedMove, SessionHooks};
use crate::pending::PendingActionQueue;
use crate::recovery::RecoverySnapshot;
use crate::reducer::{Reducer, ReducerError};
use crate::resync::{MismatchOutcome, ResyncState, ResyncTracker};
use crate::state::{GameState, snapshot_is_consistent};
use crate::transport::Transport;

fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn error_code(err: &ReducerError) -> ActionErrorCode {
    match err {
        ReducerError::NotYourTurn { .. } => ActionErrorCode::NotYourTurn,
        ReducerError::UnknownPlayer(_) => ActionErrorCode::UnknownPlayer,
        ReducerError::InvalidSnapshot(_) => ActionErrorCode::InvalidSnapshot,
        ReducerError::Encoding(_) => ActionErrorCode::InvalidAction,
    }
}

fn rejection(err: &ReducerError) -> (ActionErrorCode, String) {
    (error_code(err), err.to_string())
}

pub struct GameSession {
    local_player: PlayerId,
    config: SessionConfig,
    reducer: Reducer,
    state: GameState,
    log: ActionLog,
    pending: PendingActionQueue,
    connection: ConnectionSession,
    resync: ResyncTracker,
    transport: Box<dyn Transport>,
    spectators: Vec<Box<dyn Transport>>,
    hooks: Arc<dyn SessionHooks>,
    last_presence: PresenceLevel,
    events: VecDeque<SessionEvent>,
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("game_id", self.state.game_id())
            .field("local_player", &self.local_player)
            .field("connection", &self.connection.state())
            .field("turn_number", &self.state.turn_number())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl GameSession {
    /// Create a session in `Connecting` state around an initial game state.
    ///
    /// `local_player` must be one of the state's players.
    pub fn new(
        state: GameState,
        local_player: PlayerId,
        config: SessionConfig,
        transport: Box<dyn Transport>,
        hooks: Arc<dyn SessionHooks>,
    ) -> Result<Self, SyncError> {
        if !state.is_player(&local_player) {
            return Err(ReducerError::UnknownPlayer(local_player).into());
        }
        info!(
            game_id = %state.game_id(),
            player = %local_player,
            clock = ?config.clock_mode,
            "Session created"
        );
        Ok(Self {
            reducer: Reducer::new(config.clock_mode),
            log: ActionLog::new(config.log_capacity),
            pending: PendingActionQueue::new(),
            connection: ConnectionSession::new(&config),
            resync: ResyncTracker::new(config.resync_max_attempts, config.resync_window()),
            local_player,
            config,
            state,
            transport,
            spectators: Vec::new(),
            hooks,
            last_presence: PresenceLevel::Offline,
            events: VecDeque::new(),
        })
    }

    /// Rebuild a session from a persisted recovery snapshot.
    ///
    /// A snapshot whose hash does not match its content is rejected.
    pub fn restore(
        recovery: RecoverySnapshot,
        config: SessionConfig,
        transport: Box<dyn Transport>,
        hooks: Arc<dyn SessionHooks>,
    ) -> Result<Self, SyncError> {
        if !snapshot_is_consistent(&recovery.state) {
            warn!(game_id = %recovery.game_id, "Recovery snapshot is tainted");
            return Err(SyncError::TaintedState);
        }
        let state = GameState::from_snapshot(&recovery.state)?;
        let mut session = Self::new(state, recovery.local_player_id, config, transport, hooks)?;
        session.log = ActionLog::from_entries(session.config.log_capacity, recovery.action_log);
        session.pending = PendingActionQueue::from_actions(recovery.pending_action_queue);
        info!(
            game_id = %session.state.game_id(),
            pending = session.pending.len(),
            "Session restored"
        );
        Ok(session)
    }

    pub fn recovery_snapshot(&self, now_ms: u64) -> RecoverySnapshot {
        RecoverySnapshot {
            game_id: self.state.game_id().clone(),
            local_player_id: self.local_player.clone(),
            state: self.state.to_snapshot(),
            action_log: self.log.to_vec(),
            pending_action_queue: self.pending.to_vec(),
            timestamp_ms: now_ms,
        }
    }

    pub fn game_id(&self) -> &GameId {
        self.state.game_id()
    }

    pub fn local_player(&self) -> &PlayerId {
        &self.local_player
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn action_log(&self) -> &ActionLog {
        &self.log
    }

    pub fn pending(&self) -> &PendingActionQueue {
        &self.pending
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionSession {
        &self.connection
    }

    pub fn presence(&self, now: Instant) -> PresenceLevel {
        self.connection.presence(now)
    }

    pub fn resync_state(&self) -> ResyncState {
        self.resync.state()
    }

    /// `false` once divergence went unresolved; the state must not be shown
    /// as authoritative until a snapshot is received or pushed.
    pub fn is_trusted(&self) -> bool {
        !self.resync.is_unresolved()
    }

    /// The host is the first seated player. Only the host pushes the
    /// canonical snapshot when a fresh connection opens.
    pub fn is_host(&self) -> bool {
        self.state.players().first() == Some(&self.local_player)
    }

    pub fn add_spectator(&mut self, transport: Box<dyn Transport>) {
        self.spectators.push(transport);
    }

    pub fn spectator_count(&self) -> usize {
        self.spectators.len()
    }

    /// Events emitted since the last call, oldest first.
    ///
    /// Callers that own the session directly must drain this regularly. At
    /// most `event_buffer_capacity` events are kept; older ones are dropped.
    /// Hooks see every event regardless.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        Vec::from(std::mem::take(&mut self.events))
    }

    // ---- local operations ------------------------------------------------

    /// Make a move as the local player with a wire-expressible delta.
    pub fn make_move(&mut self, delta: MoveDelta, now: Instant) -> Result<&GameState, SyncError> {
        self.ensure_open_session()?;
        self.ensure_trusted()?;
        if let HookDecision::Veto(reason) = self
            .hooks
            .before_move(&self.state, ProposedMove::Delta(&delta))
        {
            debug!(reason = %reason, "Move vetoed by hook");
            return Err(SyncError::Vetoed(reason));
        }
        let meta = stamp(
            self.reducer.clock_mode(),
            self.state.clocks(),
            &self.local_player,
        );
        self.commit_local(Action::MakeMove { delta, meta }, now)
    }

    /// Make a move whose payload is computed by a pure function of the current
    /// payload. The result travels to the peer as a `Replace` delta.
    pub fn make_move_with<F>(&mut self, transform: F, now: Instant) -> Result<&GameState, SyncError>
    where
        F: FnOnce(&Payload) -> Payload,
    {
        self.ensure_open_session()?;
        self.ensure_trusted()?;
        if self.state.current_turn() != &self.local_player {
            return Err(ReducerError::NotYourTurn {
                expected: self.state.current_turn().clone(),
                actual: self.local_player.clone(),
            }
            .into());
        }
        let next_payload = transform(self.state.payload());
        if let HookDecision::Veto(reason) = self
            .hooks
            .before_move(&self.state, ProposedMove::Computed(&next_payload))
        {
            debug!(reason = %reason, "Move vetoed by hook");
            return Err(SyncError::Vetoed(reason));
        }
        let meta = stamp(
            self.reducer.clock_mode(),
            self.state.clocks(),
            &self.local_player,
        );
        self.commit_local(
            Action::MakeMove {
                delta: MoveDelta::Replace(next_payload),
                meta,
            },
            now,
        )
    }

    /// Host-driven turn override. Not subject to the turn lock, but only the
    /// host may issue it.
    pub fn set_turn(&mut self, player: PlayerId, now: Instant) -> Result<&GameState, SyncError> {
        self.ensure_open_session()?;
        self.ensure_trusted()?;
        if !self.is_host() {
            return Err(SyncError::NotHost(self.local_player.clone()));
        }
        let meta = stamp(
            self.reducer.clock_mode(),
            self.state.clocks(),
            &self.local_player,
        );
        self.commit_local(Action::SystemSetTurn { player, meta }, now)
    }

    /// Push the local state as canonical to the peer and spectators.
    ///
    /// This is the manual way out of `DivergenceUnresolved`.
    pub fn force_snapshot_push(&mut self) -> Result<(), SyncError> {
        self.ensure_open_session()?;
        if !self.connection.is_open() {
            return Err(SyncError::TransportUnavailable);
        }
        info!(hash = %self.state.hash().short(), "Forcing snapshot push");
        self.resync.reset();
        self.broadcast_snapshot()
    }

    /// Trickle a local ICE candidate to the peer. The core does not inspect
    /// it.
    pub fn send_ice_candidate(&mut self, candidate: String) {
        self.send_envelope(&Envelope::Ice(IceCandidate { candidate }));
    }

    /// Terminal. All deadlines are dropped; nothing fires afterwards.
    pub fn close(&mut self) {
        if self.connection.is_closed() {
            return;
        }
        self.connection.close();
        self.emit(SessionEvent::StatusChanged(ConnectionState::Closed));
    }

    // ---- transport signals -----------------------------------------------

    /// The transport is ready.
    ///
    /// A fresh host connection pushes the canonical snapshot, which already
    /// covers anything buffered. Otherwise buffered actions are flushed in
    /// causal order.
    pub fn on_transport_open(&mut self, now: Instant) -> Result<(), SyncError> {
        let from = self.connection.state();
        if !self.connection.open(now) {
            return Ok(());
        }
        self.emit(SessionEvent::StatusChanged(ConnectionState::Open));

        if from == ConnectionState::Connecting && self.is_host() {
            if !self.pending.is_empty() {
                debug!(
                    count = self.pending.len(),
                    "Initial snapshot supersedes buffered actions"
                );
                self.pending.drain_causal();
            }
            return self.broadcast_snapshot();
        }
        self.flush_pending(now);
        Ok(())
    }

    pub fn on_transport_close(&mut self, now: Instant) {
        if self.connection.disconnect(now) {
            self.emit(SessionEvent::StatusChanged(ConnectionState::Disconnected));
        }
    }

    /// External renegotiation started. Returns `false` if debounced, or if
    /// the attempt budget is exhausted (the session is then closed).
    pub fn begin_reconnect(&mut self, now: Instant) -> bool {
        let was_closed = self.connection.is_closed();
        if self.connection.begin_reconnect(now) {
            self.emit(SessionEvent::StatusChanged(ConnectionState::Reconnecting));
            return true;
        }
        if !was_closed && self.connection.is_closed() {
            self.emit(SessionEvent::StatusChanged(ConnectionState::Closed));
        }
        false
    }

    /// Drive heartbeat, reconnect debounce and presence.
    pub fn tick(&mut self, now: Instant) {
        if self.connection.is_closed() {
            return;
        }
        let timers = self.connection.poll_timers(now);
        if timers.send_ping {
            trace!("Heartbeat ping");
            self.send_envelope(&Envelope::Ping(Ping { t_ms: wall_ms() }));
        }
        if timers.reconnect_due {
            debug!("Reconnect debounce elapsed");
            self.emit(SessionEvent::ReconnectDue);
        }
        self.refresh_presence(now);
    }

    /// Handle one inbound transport message.
    ///
    /// Malformed or unknown messages are logged and dropped; rejected peer
    /// actions are answered with `actionError`. Neither is an error for the
    /// caller.
    pub fn handle_message(&mut self, bytes: &[u8], now: Instant) -> Result<(), SyncError> {
        if self.connection.is_closed() {
            debug!("Dropping message on closed session");
            return Ok(());
        }
        self.connection.record_activity(now);

        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable message");
                self.emit(SessionEvent::InvalidAction {
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        match envelope {
            Envelope::Ping(ping) => {
                trace!("Ping received");
                self.send_envelope(&Envelope::Pong(Pong { t_ms: ping.t_ms }));
            }
            Envelope::Pong(_) => {
                trace!("Pong received");
            }
            Envelope::Ice(ice) => {
                self.emit(SessionEvent::IceCandidate(ice.candidate));
            }
            Envelope::Action(ActionMsg { action }) => {
                self.handle_remote_action(action, now)?;
            }
            Envelope::Snapshot(SnapshotMsg { state }) => {
                self.handle_snapshot(state)?;
            }
            Envelope::RequestResync(RequestResync { to_hash }) => {
                info!(
                    peer_hash = %to_hash.short(),
                    local_hash = %self.state.hash().short(),
                    in_history = self.log.find_by_pre_hash(&to_hash).is_some(),
                    "Peer requested resync"
                );
                self.broadcast_snapshot()?;
            }
            Envelope::ActionError(ActionError { code, message }) => {
                warn!(?code, message = %message, "Peer rejected our action");
                self.emit(SessionEvent::ActionRejectedByPeer { code, message });
            }
        }
        self.refresh_presence(now);
        Ok(())
    }

    // ---- internals -------------------------------------------------------

    fn ensure_open_session(&self) -> Result<(), SyncError> {
        if self.connection.is_closed() {
            return Err(SyncError::SessionClosed);
        }
        Ok(())
    }

    /// Local moves are refused while divergence is unresolved;
    /// `force_snapshot_push` is the way out.
    fn ensure_trusted(&self) -> Result<(), SyncError> {
        if self.resync.is_unresolved() {
            return Err(SyncError::DivergenceUnresolved);
        }
        Ok(())
    }

    fn emit(&mut self, event: SessionEvent) {
        self.hooks.on_event(&event);
        if self.events.len() >= self.config.event_buffer_capacity.max(1) {
            trace!("Event buffer full, dropping oldest event");
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn refresh_presence(&mut self, now: Instant) {
        let presence = self.connection.presence(now);
        if presence != self.last_presence {
            debug!(from = ?self.last_presence, to = ?presence, "Presence changed");
            self.last_presence = presence;
            self.emit(SessionEvent::PresenceChanged(presence));
        }
    }

    /// Reduce a locally originated action, stamp its post-hash, then send or
    /// buffer it.
    fn commit_local(&mut self, mut action: Action, now: Instant) -> Result<&GameState, SyncError> {
        let next = self
            .reducer
            .apply(&self.state, &action, &self.local_player, wall_ms())?;
        if let Action::MakeMove { meta, .. } | Action::SystemSetTurn { meta, .. } = &mut action {
            meta.post_hash = Some(next.hash());
        }
        // Encode before committing: an unsendable move must not land locally.
        let bytes = Bytes::from(
            Envelope::Action(ActionMsg {
                action: action.clone(),
            })
            .encode()?,
        );

        debug!(
            kind = action.kind(),
            turn = next.turn_number(),
            hash = %next.hash().short(),
            "Local action applied"
        );
        self.commit(action.clone(), next, false);
        self.relay_to_spectators(&bytes);

        if self.connection.is_open() {
            if let Err(e) = self.transport.send(bytes) {
                warn!(error = %e, "Send failed, buffering action");
                self.pending.push(action);
                self.on_transport_close(now);
            }
        } else {
            debug!(
                state = ?self.connection.state(),
                pending = self.pending.len() + 1,
                "Connection not open, buffering action"
            );
            self.pending.push(action);
        }
        Ok(&self.state)
    }

    fn commit(&mut self, action: Action, next: GameState, remote: bool) {
        let is_move = matches!(action, Action::MakeMove { .. });
        self.log.push(ActionLogEntry {
            timestamp_ms: next.last_updated_at_ms(),
            pre_action_hash: self.state.hash(),
            turn_number_at_entry: self.state.turn_number(),
            action,
        });
        self.state = next;
        if is_move {
            self.hooks.after_move(&self.state);
        }
        self.emit(SessionEvent::StateAdvanced {
            turn_number: self.state.turn_number(),
            hash: self.state.hash(),
            remote,
        });
    }

    fn handle_remote_action(&mut self, action: Action, now: Instant) -> Result<(), SyncError> {
        let (actor, post_hash) = match &action {
            Action::MakeMove { meta, .. } | Action::SystemSetTurn { meta, .. } => {
                (meta.actor.clone(), meta.post_hash)
            }
            Action::SyncSnapshot { snapshot } => {
                return self.handle_snapshot(snapshot.clone());
            }
            Action::Noop => {
                debug!("Ignoring no-op action");
                return Ok(());
            }
        };

        if actor == self.local_player {
            warn!(actor = %actor, "Peer sent an action attributed to us");
            self.emit(SessionEvent::InvalidAction {
                reason: format!("action attributed to local player {actor}"),
            });
            return Ok(());
        }

        if matches!(action, Action::SystemSetTurn { .. })
            && self.state.players().first() != Some(&actor)
        {
            self.reject_peer_action(
                ActionErrorCode::NotHost,
                format!("turn override from non-host player {actor}"),
            );
            return Ok(());
        }

        let next = match self.reducer.apply(&self.state, &action, &actor, wall_ms()) {
            Ok(next) => next,
            Err(e) => {
                let (code, message) = rejection(&e);
                self.reject_peer_action(code, message);
                return Ok(());
            }
        };

        debug!(
            kind = action.kind(),
            actor = %actor,
            turn = next.turn_number(),
            hash = %next.hash().short(),
            "Remote action applied"
        );
        let bytes = Envelope::Action(ActionMsg {
            action: action.clone(),
        })
        .encode()?;
        self.commit(action, next, true);
        self.relay_to_spectators(&Bytes::from(bytes));

        if let Some(remote_hash) = post_hash {
            let local_hash = self.state.hash();
            if remote_hash != local_hash {
                self.on_divergence(local_hash, Some(remote_hash), now);
            }
        }
        Ok(())
    }

    fn reject_peer_action(&mut self, code: ActionErrorCode, message: String) {
        warn!(?code, error = %message, "Rejecting peer action");
        self.send_envelope(&Envelope::ActionError(ActionError {
            code,
            message: message.clone(),
        }));
        self.emit(SessionEvent::PeerActionRejected { code, message });
    }

    fn on_divergence(&mut self, local: StateHash, remote: Option<StateHash>, now: Instant) {
        warn!(
            local = %local.short(),
            remote = ?remote,
            "State hash mismatch"
        );
        self.emit(SessionEvent::Diverged { local, remote });

        match self.resync.on_mismatch(local, now) {
            MismatchOutcome::Request(to_hash) => {
                info!(to_hash = %to_hash.short(), "Requesting resync");
                self.send_envelope(&Envelope::RequestResync(RequestResync { to_hash }));
                self.emit(SessionEvent::ResyncRequested { to_hash });
            }
            MismatchOutcome::AlreadyPending => {
                debug!("Resync already requested");
            }
            MismatchOutcome::Unresolved => {
                error!(
                    game_id = %self.state.game_id(),
                    attempts = self.resync.attempts_in_window(),
                    "Divergence unresolved, local state untrusted"
                );
                self.emit(SessionEvent::DivergenceUnresolved { local });
            }
            MismatchOutcome::Untrusted => {
                debug!("Divergence already unresolved");
            }
        }
    }

    fn handle_snapshot(&mut self, snapshot: StateSnapshot) -> Result<(), SyncError> {
        if &snapshot.game_id != self.state.game_id() {
            let (code, message) = rejection(&ReducerError::InvalidSnapshot(format!(
                "snapshot for game {} sent to game {}",
                snapshot.game_id,
                self.state.game_id()
            )));
            self.reject_peer_action(code, message);
            return Ok(());
        }
        if !snapshot_is_consistent(&snapshot) {
            warn!(
                embedded = %snapshot.hash.short(),
                "Snapshot hash does not match its content, adopting recomputed hash"
            );
            self.emit(SessionEvent::Diverged {
                local: self.state.hash(),
                remote: Some(snapshot.hash),
            });
        }

        let bytes = Envelope::Snapshot(SnapshotMsg {
            state: snapshot.clone(),
        })
        .encode()?;
        let action = Action::SyncSnapshot { snapshot };
        let next = match self
            .reducer
            .apply(&self.state, &action, &self.local_player, wall_ms())
        {
            Ok(next) => next,
            Err(e) => {
                let (code, message) = rejection(&e);
                self.reject_peer_action(code, message);
                return Ok(());
            }
        };

        info!(
            turn = next.turn_number(),
            hash = %next.hash().short(),
            "Snapshot adopted"
        );
        self.commit(action, next, true);
        self.relay_to_spectators(&Bytes::from(bytes));
        if self.resync.on_snapshot_applied() {
            let hash = self.state.hash();
            self.emit(SessionEvent::ResyncCompleted { hash });
        }
        Ok(())
    }

    fn broadcast_snapshot(&mut self) -> Result<(), SyncError> {
        let bytes = Bytes::from(
            Envelope::Snapshot(SnapshotMsg {
                state: self.state.to_snapshot(),
            })
            .encode()?,
        );
        debug!(hash = %self.state.hash().short(), "Broadcasting snapshot");
        self.relay_to_spectators(&bytes);
        if self.connection.is_open() {
            if let Err(e) = self.transport.send(bytes) {
                warn!(error = %e, "Snapshot send failed");
                return Err(SyncError::TransportUnavailable);
            }
        }
        Ok(())
    }

    /// Send the buffered actions in causal order. On the first failure the
    /// rest goes back into the queue.
    fn flush_pending(&mut self, now: Instant) {
        if self.pending.is_empty() {
            return;
        }
        let actions = self.pending.drain_causal();
        let total = actions.len();
        let mut sent = 0;
        for (i, action) in actions.iter().enumerate() {
            let encoded = Envelope::Action(ActionMsg {
                action: action.clone(),
            })
            .encode();
            let bytes = match encoded {
                Ok(bytes) => Bytes::from(bytes),
                Err(e) => {
                    error!(error = %e, kind = action.kind(), "Dropping unencodable buffered action");
                    continue;
                }
            };
            if let Err(e) = self.transport.send(bytes) {
                warn!(error = %e, remaining = total - i, "Flush interrupted");
                self.pending.requeue_front(actions[i..].to_vec());
                self.on_transport_close(now);
                break;
            }
            sent += 1;
        }
        info!(sent, total, "Flushed buffered actions");
        self.emit(SessionEvent::PendingFlushed { count: sent });
    }

    /// Fire-and-forget control message to the peer.
    fn send_envelope(&mut self, envelope: &Envelope) {
        if !self.connection.is_open() {
            trace!(msg = ?envelope.msg_id(), "Connection not open, dropping control message");
            return;
        }
        match envelope.encode() {
            Ok(bytes) => {
                if let Err(e) = self.transport.send(Bytes::from(bytes)) {
                    warn!(error = %e, msg = ?envelope.msg_id(), "Control send failed");
                }
            }
            Err(e) => error!(error = %e, "Failed to encode control message"),
        }
    }

    fn relay_to_spectators(&mut self, bytes: &Bytes) {
        self.spectators.retain_mut(|spectator| match spectator.send(bytes.clone()) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Dropping spectator");
                false
            }
        });
    }
}
