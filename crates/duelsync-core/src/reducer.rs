//! Deterministic reducer.
//!
//! `apply` is pure: it never performs I/O and never mutates its input state.
//! Time is passed in explicitly so two replicas applying the same action
//! produce the same hash.

use duelsync_proto::{Action, ActionMeta, MoveDelta, Payload, PlayerId, value::merge_shallow};
use thiserror::Error;

use crate::clock::ClockStrategy;
use crate::config::ClockMode;
use crate::state::GameState;

#[derive(Error, Debug)]
pub enum ReducerError {
    #[error("not your turn: {actual} moved but it is {expected}'s turn")]
    NotYourTurn { expected: PlayerId, actual: PlayerId },

    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("state encoding failed: {0}")]
    Encoding(#[from] postcard::Error),
}

/// State transition function bound to one clock strategy.
#[derive(Clone, Copy)]
pub struct Reducer {
    clock: &'static dyn ClockStrategy,
}

impl Default for Reducer {
    fn default() -> Self {
        Self::new(ClockMode::Lamport)
    }
}

impl std::fmt::Debug for Reducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reducer")
            .field("clock", &self.clock.mode())
            .finish()
    }
}

impl Reducer {
    pub fn new(mode: ClockMode) -> Self {
        Self {
            clock: mode.strategy(),
        }
    }

    pub fn clock_mode(&self) -> ClockMode {
        self.clock.mode()
    }

    /// Apply `action` on behalf of `local_player`.
    ///
    /// - `MakeMove` requires `state.current_turn == local_player`.
    /// - `SyncSnapshot` replaces the state unconditionally and recomputes the
    ///   hash.
    /// - `SystemSetTurn` sets the turn owner directly.
    /// - `Noop` returns the input unchanged.
    pub fn apply(
        &self,
        state: &GameState,
        action: &Action,
        local_player: &PlayerId,
        now_ms: u64,
    ) -> Result<GameState, ReducerError> {
        match action {
            Action::MakeMove { delta, meta } => {
                self.check_turn(state, local_player)?;
                let next_payload = match delta {
                    MoveDelta::Merge(delta) => merge_shallow(state.payload(), delta),
                    MoveDelta::Replace(payload) => payload.clone(),
                };
                self.advance_turn(state, next_payload, meta, now_ms)
            }
            Action::SyncSnapshot { snapshot } => GameState::from_snapshot(snapshot),
            Action::SystemSetTurn { player, meta } => {
                if !state.is_player(player) {
                    return Err(ReducerError::UnknownPlayer(player.clone()));
                }
                let clocks = self.clock.advance(state.clocks(), meta);
                GameState::from_parts(
                    state.game_id().clone(),
                    state.players().to_vec(),
                    player.clone(),
                    state.turn_number(),
                    state.payload().clone(),
                    clocks,
                    now_ms,
                )
            }
            Action::Noop => Ok(state.clone()),
        }
    }

    /// Apply a move whose payload transform is a caller-supplied pure function.
    ///
    /// Same turn lock and clock rules as `MakeMove`; the transform only sees the
    /// current payload.
    pub fn apply_fn<F>(
        &self,
        state: &GameState,
        transform: F,
        meta: &ActionMeta,
        local_player: &PlayerId,
        now_ms: u64,
    ) -> Result<GameState, ReducerError>
    where
        F: FnOnce(&Payload) -> Payload,
    {
        self.check_turn(state, local_player)?;
        let next_payload = transform(state.payload());
        self.advance_turn(state, next_payload, meta, now_ms)
    }

    fn check_turn(&self, state: &GameState, player: &PlayerId) -> Result<(), ReducerError> {
        if state.current_turn() != player {
            return Err(ReducerError::NotYourTurn {
                expected: state.current_turn().clone(),
                actual: player.clone(),
            });
        }
        Ok(())
    }

    fn advance_turn(
        &self,
        state: &GameState,
        next_payload: Payload,
        meta: &ActionMeta,
        now_ms: u64,
    ) -> Result<GameState, ReducerError> {
        let clocks = self.clock.advance(state.clocks(), meta);
        GameState::from_parts(
            state.game_id().clone(),
            state.players().to_vec(),
            state.next_player().clone(),
            state.turn_number() + 1,
            next_payload,
            clocks,
            now_ms,
        )
    }
}

/// Apply `action` with the default (Lamport) reducer.
pub fn apply(
    state: &GameState,
    action: &Action,
    local_player: &PlayerId,
    now_ms: u64,
) -> Result<GameState, ReducerError> {
    Reducer::default().apply(state, action, local_player, now_ms)
}
