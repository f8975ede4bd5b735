//! Actions produced locally while the connection is not open.

use duelsync_proto::Action;

/// Unordered multiset of locally originated actions awaiting transmission.
///
/// Drained in causal `(lamport, counter)` order, never wall-clock order.
#[derive(Debug, Default)]
pub struct PendingActionQueue {
    actions: Vec<Action>,
}

impl PendingActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Put back actions that failed to send, ahead of anything queued since.
    pub fn requeue_front(&mut self, mut actions: Vec<Action>) {
        actions.append(&mut self.actions);
        self.actions = actions;
    }

    /// Remove every action, sorted by `(lamport, counter)` ascending.
    ///
    /// The sort is stable: ties keep insertion order.
    pub fn drain_causal(&mut self) -> Vec<Action> {
        let mut drained = std::mem::take(&mut self.actions);
        drained.sort_by_key(Action::causal_key);
        drained
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    pub fn to_vec(&self) -> Vec<Action> {
        self.actions.clone()
    }

    pub fn from_actions(actions: Vec<Action>) -> Self {
        Self { actions }
    }
}
