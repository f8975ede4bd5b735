//! Persisted recovery snapshot, produced and consumed at session boundaries.

use duelsync_proto::{Action, GameId, PlayerId, StateSnapshot};
use serde::{Deserialize, Serialize};

use crate::action_log::ActionLogEntry;
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    pub game_id: GameId,
    pub local_player_id: PlayerId,
    pub state: StateSnapshot,
    /// Oldest first.
    pub action_log: Vec<ActionLogEntry>,
    pub pending_action_queue: Vec<Action>,
    pub timestamp_ms: u64,
}

impl RecoverySnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        postcard::to_stdvec(self).map_err(|e| SyncError::Protocol(e.into()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        postcard::from_bytes(bytes).map_err(|e| SyncError::Protocol(e.into()))
    }
}
