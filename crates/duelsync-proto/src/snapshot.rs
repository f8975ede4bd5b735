use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{GameId, PlayerId};
use crate::value::Payload;

/// SHA-256 digest of a game state's hashed fields.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StateHash(pub [u8; 32]);

impl StateHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for StateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateHash({})", self.short())
    }
}

/// Logical clocks carried by a game state.
///
/// Only one of the two fields advances in a given session, depending on the
/// configured clock mode.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClockState {
    pub lamport: u64,
    pub counters: BTreeMap<PlayerId, u64>,
}

impl ClockState {
    pub fn counter(&self, player: &PlayerId) -> u64 {
        self.counters.get(player).copied().unwrap_or(0)
    }
}

/// Full game state as it crosses the wire (`snapshot` messages, recovery
/// files).
///
/// The embedded `hash` is what the sender believed; receivers always
/// recompute it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub game_id: GameId,
    pub players: Vec<PlayerId>,
    pub current_turn: PlayerId,
    pub turn_number: u64,
    pub payload: Payload,
    pub clocks: ClockState,
    pub last_updated_at_ms: u64,
    pub hash: StateHash,
}
