//! Bounded history of applied actions.
//!
//! Backed by a fixed-capacity ring indexed by a write cursor, so appending
//! never reallocates once the ring is full. The log supports resync probing
//! and audit only; it is not a replay source from genesis.

use duelsync_proto::{Action, StateHash};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub timestamp_ms: u64,
    pub action: Action,
    /// Hash of the state the action was applied to.
    pub pre_action_hash: StateHash,
    pub turn_number_at_entry: u64,
}

#[derive(Debug)]
pub struct ActionLog {
    slots: Vec<Option<ActionLogEntry>>,
    /// Next slot to write.
    cursor: usize,
    len: usize,
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ActionLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            cursor: 0,
            len: 0,
        }
    }

    /// Append an entry, evicting the oldest one when full.
    pub fn push(&mut self, entry: ActionLogEntry) {
        let capacity = self.slots.len();
        self.slots[self.cursor] = Some(entry);
        self.cursor = (self.cursor + 1) % capacity;
        self.len = (self.len + 1).min(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &ActionLogEntry> {
        let capacity = self.slots.len();
        let start = (self.cursor + capacity - self.len) % capacity;
        (0..self.len).filter_map(move |i| self.slots[(start + i) % capacity].as_ref())
    }

    pub fn latest(&self) -> Option<&ActionLogEntry> {
        self.iter().last()
    }

    pub fn oldest(&self) -> Option<&ActionLogEntry> {
        self.iter().next()
    }

    /// Most recent entry that was applied on top of `hash`.
    pub fn find_by_pre_hash(&self, hash: &StateHash) -> Option<&ActionLogEntry> {
        self.iter()
            .filter(|entry| &entry.pre_action_hash == hash)
            .last()
    }

    /// Owned copy, oldest first (for recovery snapshots).
    pub fn to_vec(&self) -> Vec<ActionLogEntry> {
        self.iter().cloned().collect()
    }

    /// Rebuild a log from entries ordered oldest first. Only the newest
    /// `capacity` entries are kept.
    pub fn from_entries(capacity: usize, entries: Vec<ActionLogEntry>) -> Self {
        let mut log = Self::new(capacity);
        for entry in entries {
            log.push(entry);
        }
        log
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.cursor = 0;
        self.len = 0;
    }
}
