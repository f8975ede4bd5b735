use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::snapshot::{StateHash, StateSnapshot};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ActionMsg {
    pub action: Action,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMsg {
    pub state: StateSnapshot,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RequestResync {
    /// The requester's current (mismatched) hash.
    pub to_hash: StateHash,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionErrorCode {
    NotYourTurn,
    UnknownPlayer,
    InvalidSnapshot,
    InvalidAction,
    /// A turn override came from a player other than the host.
    NotHost,
}

/// Reply to a peer whose action was rejected.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ActionError {
    pub code: ActionErrorCode,
    pub message: String,
}
