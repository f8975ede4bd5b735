//! Logical clocks for causal ordering of actions.
//!
//! Two strategies share one trait, selected by [`ClockMode`]:
//! - **Lamport**: a single scalar shared by both players.
//! - **Per-player**: an independent counter per player.
//!
//! Both merge with `max(local, remote) + 1`, so a stale or reordered action
//! can never move a clock backward.

use duelsync_proto::{ActionMeta, ClockState, PlayerId};

use crate::config::ClockMode;

/// Strategy trait for advancing the clocks of a game state.
pub trait ClockStrategy: Send + Sync {
    /// Clock values to embed in the meta of a locally originated action.
    ///
    /// Returns `(lamport, counter)` as observed *before* the action.
    fn observe(&self, clocks: &ClockState, actor: &PlayerId) -> (u64, u64);

    /// Clocks after accepting an action carrying `meta`.
    fn advance(&self, clocks: &ClockState, meta: &ActionMeta) -> ClockState;

    fn mode(&self) -> ClockMode;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LamportClock;

impl ClockStrategy for LamportClock {
    fn observe(&self, clocks: &ClockState, actor: &PlayerId) -> (u64, u64) {
        (clocks.lamport, clocks.counter(actor))
    }

    fn advance(&self, clocks: &ClockState, meta: &ActionMeta) -> ClockState {
        let mut next = clocks.clone();
        next.lamport = clocks.lamport.max(meta.lamport).saturating_add(1);
        next
    }

    fn mode(&self) -> ClockMode {
        ClockMode::Lamport
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PerPlayerClock;

impl ClockStrategy for PerPlayerClock {
    fn observe(&self, clocks: &ClockState, actor: &PlayerId) -> (u64, u64) {
        (clocks.lamport, clocks.counter(actor))
    }

    fn advance(&self, clocks: &ClockState, meta: &ActionMeta) -> ClockState {
        let mut next = clocks.clone();
        let local = clocks.counter(&meta.actor);
        next.counters
            .insert(meta.actor.clone(), local.max(meta.counter).saturating_add(1));
        next
    }

    fn mode(&self) -> ClockMode {
        ClockMode::PerPlayer
    }
}

impl ClockMode {
    pub fn strategy(self) -> &'static dyn ClockStrategy {
        match self {
            ClockMode::Lamport => &LamportClock,
            ClockMode::PerPlayer => &PerPlayerClock,
        }
    }
}

/// Build the meta for an action `actor` is about to originate.
pub fn stamp(mode: ClockMode, clocks: &ClockState, actor: &PlayerId) -> ActionMeta {
    let (lamport, counter) = mode.strategy().observe(clocks, actor);
    ActionMeta {
        actor: actor.clone(),
        lamport,
        counter,
        post_hash: None,
    }
}

/// Whether `next` is reachable from `prev` without any clock moving backward.
pub fn is_monotonic(prev: &ClockState, next: &ClockState) -> bool {
    next.lamport >= prev.lamport
        && prev
            .counters
            .iter()
            .all(|(player, &value)| next.counter(player) >= value)
}
