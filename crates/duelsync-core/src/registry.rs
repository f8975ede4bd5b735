//! Host-owned map of game sessions.

use std::collections::HashMap;

use duelsync_proto::GameId;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::session::GameSession;

/// Sessions keyed by game id, plus an optional "active" selection.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<GameId, GameSession>,
    active: Option<GameId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its own game id, returning any session it
    /// replaced.
    pub fn insert(&mut self, session: GameSession) -> Option<GameSession> {
        let game_id = session.game_id().clone();
        info!(game_id = %game_id, "Registering session");
        self.sessions.insert(game_id, session)
    }

    pub fn get(&self, game_id: &GameId) -> Result<&GameSession, SyncError> {
        self.sessions
            .get(game_id)
            .ok_or_else(|| SyncError::GameNotFound(game_id.clone()))
    }

    pub fn get_mut(&mut self, game_id: &GameId) -> Result<&mut GameSession, SyncError> {
        self.sessions
            .get_mut(game_id)
            .ok_or_else(|| SyncError::GameNotFound(game_id.clone()))
    }

    /// Remove a session. Clears the active selection if it pointed at it.
    pub fn remove(&mut self, game_id: &GameId) -> Result<GameSession, SyncError> {
        let session = self
            .sessions
            .remove(game_id)
            .ok_or_else(|| SyncError::GameNotFound(game_id.clone()))?;
        if self.active.as_ref() == Some(game_id) {
            debug!(game_id = %game_id, "Active session removed");
            self.active = None;
        }
        info!(game_id = %game_id, "Session removed");
        Ok(session)
    }

    pub fn set_active(&mut self, game_id: &GameId) -> Result<(), SyncError> {
        if !self.sessions.contains_key(game_id) {
            return Err(SyncError::GameNotFound(game_id.clone()));
        }
        self.active = Some(game_id.clone());
        Ok(())
    }

    pub fn active_id(&self) -> Option<&GameId> {
        self.active.as_ref()
    }

    pub fn active(&self) -> Option<&GameSession> {
        self.active.as_ref().and_then(|id| self.sessions.get(id))
    }

    pub fn active_mut(&mut self) -> Option<&mut GameSession> {
        self.active.as_ref().and_then(|id| self.sessions.get_mut(id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<GameId> {
        let mut ids: Vec<GameId> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use duelsync_proto::{Payload, PlayerId};

    use super::*;
    use crate::config::SessionConfig;
    use crate::hooks::NoopHooks;
    use crate::state::GameState;
    use crate::transport::ChannelTransport;

    fn session(game: &str) -> GameSession {
        let state = GameState::new(
            GameId::from(game),
            vec![PlayerId::from("A"), PlayerId::from("B")],
            Payload::new(),
            0,
        )
        .unwrap();
        let (transport, _rx) = ChannelTransport::pair(8);
        GameSession::new(
            state,
            PlayerId::from("A"),
            SessionConfig::default(),
            Box::new(transport),
            Arc::new(NoopHooks),
        )
        .unwrap()
    }

    #[test]
    fn lookup_of_unknown_game_fails() {
        let mut registry = SessionRegistry::new();
        let missing = GameId::from("nope");
        assert!(matches!(
            registry.get(&missing),
            Err(SyncError::GameNotFound(id)) if id == missing
        ));
        assert!(matches!(
            registry.set_active(&missing),
            Err(SyncError::GameNotFound(_))
        ));
        assert!(registry.remove(&missing).is_err());
    }

    #[test]
    fn active_selection_follows_removal() {
        let mut registry = SessionRegistry::new();
        registry.insert(session("g2"));
        registry.insert(session("g1"));
        assert_eq!(registry.ids(), vec![GameId::from("g1"), GameId::from("g2")]);

        registry.set_active(&GameId::from("g1")).unwrap();
        assert_eq!(
            registry.active().map(|s| s.game_id().clone()),
            Some(GameId::from("g1"))
        );
        assert!(registry.active_mut().is_some());

        registry.remove(&GameId::from("g1")).unwrap();
        assert!(registry.active().is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.get_mut(&GameId::from("g2")).is_ok());
    }
}
