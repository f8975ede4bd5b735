//! Divergence tracking for one peer connection.
//!
//! `InSync -> (hash mismatch) -> ResyncRequested -> (snapshot applied) ->
//! InSync`. Requests are capped per time window; once the cap is exceeded
//! the tracker is `Unresolved` and stays there until a snapshot arrives or the
//! caller forces a push.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use duelsync_proto::StateHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncState {
    InSync,
    ResyncRequested { to_hash: StateHash, since: Instant },
    /// Attempt cap exceeded; the local state is no longer trusted.
    Unresolved,
}

/// What the session should do about a detected mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchOutcome {
    /// Send `requestResync` carrying this (local) hash.
    Request(StateHash),
    /// A request is already outstanding; send nothing.
    AlreadyPending,
    /// The cap was just exceeded; surface `DivergenceUnresolved`.
    Unresolved,
    /// Already unresolved; stay quiet until corrected externally.
    Untrusted,
}

#[derive(Debug)]
pub struct ResyncTracker {
    state: ResyncState,
    attempts: VecDeque<Instant>,
    max_attempts: u32,
    window: Duration,
}

impl ResyncTracker {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            state: ResyncState::InSync,
            attempts: VecDeque::new(),
            max_attempts: max_attempts.max(1),
            window,
        }
    }

    pub fn state(&self) -> ResyncState {
        self.state
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self.state, ResyncState::Unresolved)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, ResyncState::ResyncRequested { .. })
    }

    /// Attempts recorded inside the current window.
    pub fn attempts_in_window(&self) -> usize {
        self.attempts.len()
    }

    /// An outstanding request older than this is assumed lost and may be
    /// repeated.
    fn retry_after(&self) -> Duration {
        self.window / self.max_attempts
    }

    pub fn on_mismatch(&mut self, local_hash: StateHash, now: Instant) -> MismatchOutcome {
        match self.state {
            ResyncState::Unresolved => return MismatchOutcome::Untrusted,
            ResyncState::ResyncRequested { since, .. }
                if now.saturating_duration_since(since) < self.retry_after() =>
            {
                return MismatchOutcome::AlreadyPending;
            }
            _ => {}
        }

        while let Some(&oldest) = self.attempts.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }

        if self.attempts.len() >= self.max_attempts as usize {
            self.state = ResyncState::Unresolved;
            return MismatchOutcome::Unresolved;
        }

        self.attempts.push_back(now);
        self.state = ResyncState::ResyncRequested {
            to_hash: local_hash,
            since: now,
        };
        MismatchOutcome::Request(local_hash)
    }

    /// A snapshot was applied. Returns `true` if it closed an outstanding
    /// request or cleared the unresolved condition.
    pub fn on_snapshot_applied(&mut self) -> bool {
        let was_out_of_sync = !matches!(self.state, ResyncState::InSync);
        self.state = ResyncState::InSync;
        was_out_of_sync
    }

    /// Manual intervention (forced snapshot push): trust is restored and the
    /// attempt history starts over.
    pub fn reset(&mut self) {
        self.state = ResyncState::InSync;
        self.attempts.clear();
    }
}
