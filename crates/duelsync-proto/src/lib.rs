//! Wire protocol for duelsync peers.
//!
//! Every message travels as `[Header][postcard payload]`. The data model that
//! crosses the wire (payload values, actions, snapshots) lives here as well so
//! both peers and spectators agree on one encoding.

pub mod action;
pub mod codec;
pub mod constants;
pub mod error;
pub mod header;
pub mod ids;
pub mod limits;
pub mod messages;
pub mod msg_id;
pub mod snapshot;
pub mod value;

pub use action::{Action, ActionMeta, MoveDelta};
pub use ids::{GameId, PlayerId};
pub use messages::Envelope;
pub use snapshot::{ClockState, StateHash, StateSnapshot};
pub use value::{Payload, Value};
