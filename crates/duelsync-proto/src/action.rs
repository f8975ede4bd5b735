use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;
use crate::snapshot::{StateHash, StateSnapshot};
use crate::value::Payload;

/// Clock metadata attached to player and system actions.
///
/// `lamport` and `counter` are the values the originator observed *before*
/// applying the action; every replica advances to `max(local, meta) + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMeta {
    pub actor: PlayerId,
    pub lamport: u64,
    pub counter: u64,
    /// Hash the originator computed after applying the action.
    pub post_hash: Option<StateHash>,
}

/// Payload transform of a move, in wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveDelta {
    /// Top-level keys replace the current payload's keys.
    Merge(Payload),
    /// The payload is replaced wholesale.
    Replace(Payload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    MakeMove { delta: MoveDelta, meta: ActionMeta },
    SyncSnapshot { snapshot: StateSnapshot },
    SystemSetTurn { player: PlayerId, meta: ActionMeta },
    /// Explicit pass-through; the reducer returns the state unchanged.
    Noop,
}

impl Action {
    pub fn meta(&self) -> Option<&ActionMeta> {
        match self {
            Action::MakeMove { meta, .. } | Action::SystemSetTurn { meta, .. } => Some(meta),
            Action::SyncSnapshot { .. } | Action::Noop => None,
        }
    }

    /// Sort key for causal replay: `(lamport, counter)`.
    pub fn causal_key(&self) -> (u64, u64) {
        self.meta()
            .map(|meta| (meta.lamport, meta.counter))
            .unwrap_or((0, 0))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::MakeMove { .. } => "make_move",
            Action::SyncSnapshot { .. } => "sync_snapshot",
            Action::SystemSetTurn { .. } => "system_set_turn",
            Action::Noop => "noop",
        }
    }
}
