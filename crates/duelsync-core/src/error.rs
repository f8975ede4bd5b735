//! Session error types.

use duelsync_proto::{GameId, PlayerId, error::ProtoError};
use thiserror::Error;

use crate::reducer::ReducerError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Reducer(#[from] ReducerError),

    #[error("game not found: {0}")]
    GameNotFound(GameId),

    #[error("divergence unresolved after repeated resync attempts")]
    DivergenceUnresolved,

    #[error("only the host may override the turn, {0} is not the host")]
    NotHost(PlayerId),

    #[error("transport unavailable")]
    TransportUnavailable,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    #[error("move vetoed: {0}")]
    Vetoed(String),

    #[error("state hash does not match its content")]
    TaintedState,

    #[error("session closed")]
    SessionClosed,

    #[error("channel send error")]
    ChannelSend,

    #[error("channel receive error")]
    ChannelRecv,
}

impl SyncError {
    /// Errors that leave the session usable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SyncError::DivergenceUnresolved | SyncError::SessionClosed
        )
    }
}
