//! Extension points invoked by a session.

use std::sync::atomic::{AtomicU64, Ordering};

use duelsync_proto::{MoveDelta, Payload};
use parking_lot::Mutex;

use crate::events::SessionEvent;
use crate::state::GameState;

/// Outcome of [`SessionHooks::before_move`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Allow,
    Veto(String),
}

/// The payload change a local move is about to make.
#[derive(Debug, Clone, Copy)]
pub enum ProposedMove<'a> {
    Delta(&'a MoveDelta),
    /// Result of a caller-supplied transform.
    Computed(&'a Payload),
}

/// Capability interface a session holds by reference.
///
/// All methods default to no-ops.
pub trait SessionHooks: Send + Sync {
    /// Called before a *local* move is reduced. May veto; a veto surfaces as
    /// `SyncError::Vetoed` and leaves the state untouched. Never called for
    /// remote actions.
    fn before_move(&self, _state: &GameState, _proposed: ProposedMove<'_>) -> HookDecision {
        HookDecision::Allow
    }

    /// Observe-only. Called after any move (local or remote) is applied.
    fn after_move(&self, _state: &GameState) {}

    /// Observe-only event stream.
    fn on_event(&self, _event: &SessionEvent) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {}

/// Hooks that keep every event and count applied moves.
///
/// Shared between the session and an observer through `Arc`.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<SessionEvent>>,
    moves: AtomicU64,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the recorded events, oldest first.
    pub fn take(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn moves_applied(&self) -> u64 {
        self.moves.load(Ordering::Relaxed)
    }
}

impl SessionHooks for EventRecorder {
    fn after_move(&self, _state: &GameState) {
        self.moves.fetch_add(1, Ordering::Relaxed);
    }

    fn on_event(&self, event: &SessionEvent) {
        self.events.lock().push(event.clone());
    }
}
