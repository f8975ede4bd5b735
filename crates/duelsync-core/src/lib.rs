//! Turn-based game state synchronization between two peers.
//!
//! This crate keeps a two-player game session consistent over a lossy,
//! reordering transport. It implements a deterministic reducer guarded by a
//! turn lock, logical clocks for causal order, hash-based divergence
//! detection with snapshot resync, and a connection state machine that
//! buffers local moves while the peer is unreachable.
//!
//! # Architecture
//!
//! - [`state`]: game state and its content hash
//! - [`reducer`]: pure state transition function
//! - [`clock`]: Lamport / per-player counter clocks
//! - [`action_log`]: bounded history ring
//! - [`pending`]: actions buffered while disconnected
//! - [`resync`]: divergence tracking and resync attempt cap
//! - [`connection`]: per-peer connection lifecycle and presence
//! - [`session`]: the single mutation point tying it all together
//! - [`driver`]: tokio task owning a session
//! - [`registry`]: host-owned map of sessions
//! - [`recovery`]: persisted recovery snapshot

pub mod action_log;
pub mod clock;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod events;
pub mod hooks;
pub mod pending;
pub mod recovery;
pub mod reducer;
pub mod registry;
pub mod resync;
pub mod session;
pub mod state;
pub mod transport;

pub use config::{ClockMode, SessionConfig};
pub use connection::{ConnectionState, PresenceLevel};
pub use driver::{SessionCommand, SessionDriver, SessionHandle, TransportEvent};
pub use duelsync_proto::{Action, GameId, MoveDelta, Payload, PlayerId, StateHash, Value};
pub use error::SyncError;
pub use events::SessionEvent;
pub use hooks::{EventRecorder, HookDecision, NoopHooks, SessionHooks};
pub use reducer::{ReducerError, apply};
pub use registry::SessionRegistry;
pub use session::GameSession;
pub use state::GameState;
pub use transport::{ChannelTransport, Signaling, Transport, TransportError};
