//! Game state and its content hash.

use duelsync_proto::{ClockState, GameId, Payload, PlayerId, StateHash, StateSnapshot};
use ring::digest;
use serde::Serialize;

use crate::reducer::ReducerError;

/// Fields covered by the state hash, borrowed for encoding.
///
/// `game_id`, `players` and the timestamp are not hashed.
#[derive(Serialize)]
struct HashInput<'a> {
    payload: &'a Payload,
    turn_number: u64,
    current_turn: &'a PlayerId,
    clocks: &'a ClockState,
}

/// SHA-256 over the postcard encoding of `{payload, turn_number,
/// current_turn, clocks}`.
pub fn compute_hash(
    payload: &Payload,
    turn_number: u64,
    current_turn: &PlayerId,
    clocks: &ClockState,
) -> Result<StateHash, postcard::Error> {
    let bytes = postcard::to_stdvec(&HashInput {
        payload,
        turn_number,
        current_turn,
        clocks,
    })?;
    let digest = digest::digest(&digest::SHA256, &bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    Ok(StateHash(out))
}

/// Authoritative state of one game session.
///
/// Immutable from the outside: every transition produces a new value through
/// the reducer, and the hash is recomputed on construction. A `GameState`
/// therefore can never be tainted; taint is a property of inbound
/// [`StateSnapshot`]s (see [`snapshot_is_consistent`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    game_id: GameId,
    players: Vec<PlayerId>,
    current_turn: PlayerId,
    turn_number: u64,
    payload: Payload,
    clocks: ClockState,
    last_updated_at_ms: u64,
    hash: StateHash,
}

impl GameState {
    /// Start a new game: the first player in `players` moves first.
    pub fn new(
        game_id: GameId,
        players: Vec<PlayerId>,
        payload: Payload,
        now_ms: u64,
    ) -> Result<Self, ReducerError> {
        let Some(first) = players.first().cloned() else {
            return Err(ReducerError::InvalidSnapshot("no players".to_string()));
        };
        Self::from_parts(
            game_id,
            players,
            first,
            0,
            payload,
            ClockState::default(),
            now_ms,
        )
    }

    /// Build a state from its parts, computing the hash.
    pub(crate) fn from_parts(
        game_id: GameId,
        players: Vec<PlayerId>,
        current_turn: PlayerId,
        turn_number: u64,
        payload: Payload,
        clocks: ClockState,
        last_updated_at_ms: u64,
    ) -> Result<Self, ReducerError> {
        if players.is_empty() {
            return Err(ReducerError::InvalidSnapshot("no players".to_string()));
        }
        if !players.contains(&current_turn) {
            return Err(ReducerError::UnknownPlayer(current_turn));
        }
        let hash = compute_hash(&payload, turn_number, &current_turn, &clocks)?;
        Ok(Self {
            game_id,
            players,
            current_turn,
            turn_number,
            payload,
            clocks,
            last_updated_at_ms,
            hash,
        })
    }

    /// Adopt a snapshot, recomputing the hash locally.
    ///
    /// The sender's embedded hash is ignored.
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Result<Self, ReducerError> {
        if snapshot.players.is_empty() {
            return Err(ReducerError::InvalidSnapshot("no players".to_string()));
        }
        if !snapshot.players.contains(&snapshot.current_turn) {
            return Err(ReducerError::InvalidSnapshot(format!(
                "current turn {} is not a player",
                snapshot.current_turn
            )));
        }
        Self::from_parts(
            snapshot.game_id.clone(),
            snapshot.players.clone(),
            snapshot.current_turn.clone(),
            snapshot.turn_number,
            snapshot.payload.clone(),
            snapshot.clocks.clone(),
            snapshot.last_updated_at_ms,
        )
    }

    pub fn to_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            game_id: self.game_id.clone(),
            players: self.players.clone(),
            current_turn: self.current_turn.clone(),
            turn_number: self.turn_number,
            payload: self.payload.clone(),
            clocks: self.clocks.clone(),
            last_updated_at_ms: self.last_updated_at_ms,
            hash: self.hash,
        }
    }

    /// Recompute the hash from the hashed fields.
    pub fn recompute_hash(&self) -> Result<StateHash, postcard::Error> {
        compute_hash(
            &self.payload,
            self.turn_number,
            &self.current_turn,
            &self.clocks,
        )
    }

    /// Player that follows `current_turn` in seat order.
    pub fn next_player(&self) -> &PlayerId {
        let idx = self
            .players
            .iter()
            .position(|p| p == &self.current_turn)
            .unwrap_or(0);
        &self.players[(idx + 1) % self.players.len()]
    }

    pub fn is_player(&self, player: &PlayerId) -> bool {
        self.players.contains(player)
    }

    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    pub fn players(&self) -> &[PlayerId] {
        &self.players
    }

    pub fn current_turn(&self) -> &PlayerId {
        &self.current_turn
    }

    pub fn turn_number(&self) -> u64 {
        self.turn_number
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn clocks(&self) -> &ClockState {
        &self.clocks
    }

    pub fn last_updated_at_ms(&self) -> u64 {
        self.last_updated_at_ms
    }

    pub fn hash(&self) -> StateHash {
        self.hash
    }
}

/// Whether a snapshot's embedded hash matches its content.
///
/// A snapshot failing this check is tainted and must not be shown as
/// authoritative until reconciled.
pub fn snapshot_is_consistent(snapshot: &StateSnapshot) -> bool {
    compute_hash(
        &snapshot.payload,
        snapshot.turn_number,
        &snapshot.current_turn,
        &snapshot.clocks,
    )
    .map(|hash| hash == snapshot.hash)
    .unwrap_or(false)
}
