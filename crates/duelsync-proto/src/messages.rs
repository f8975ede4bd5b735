use serde::de::DeserializeOwned;

use crate::{codec, error::ProtoError, msg_id::MsgId};

pub mod presence;
pub mod signal;
pub mod sync;

use presence::{Ping, Pong};
use signal::IceCandidate;
use sync::{ActionError, ActionMsg, RequestResync, SnapshotMsg};

/// A trait for all duelsync protocol messages.
///
/// Each message type declares its `MsgId`, enabling automatic header
/// construction during encoding.
pub trait Message: serde::Serialize + DeserializeOwned + Send + 'static {
    fn msg_id() -> MsgId;
}

macro_rules! impl_message {
    ($($ty:ty => $id:ident),* $(,)?) => {
        $(
            impl Message for $ty {
                fn msg_id() -> MsgId {
                    MsgId::$id
                }
            }
        )*
    };
}

impl_message! {
    Ping => Ping,
    Pong => Pong,
    IceCandidate => Ice,
    ActionMsg => Action,
    SnapshotMsg => Snapshot,
    RequestResync => RequestResync,
    ActionError => ActionError,
}

/// Every message a peer can receive, decoded.
///
/// Dispatch sites match on this exhaustively, so adding a message kind is a
/// compile-time-checked change.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Ping(Ping),
    Pong(Pong),
    Ice(IceCandidate),
    Action(ActionMsg),
    Snapshot(SnapshotMsg),
    RequestResync(RequestResync),
    ActionError(ActionError),
}

impl Envelope {
    pub fn msg_id(&self) -> MsgId {
        match self {
            Envelope::Ping(_) => MsgId::Ping,
            Envelope::Pong(_) => MsgId::Pong,
            Envelope::Ice(_) => MsgId::Ice,
            Envelope::Action(_) => MsgId::Action,
            Envelope::Snapshot(_) => MsgId::Snapshot,
            Envelope::RequestResync(_) => MsgId::RequestResync,
            Envelope::ActionError(_) => MsgId::ActionError,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtoError> {
        match self {
            Envelope::Ping(m) => codec::encode_message(m),
            Envelope::Pong(m) => codec::encode_message(m),
            Envelope::Ice(m) => codec::encode_message(m),
            Envelope::Action(m) => codec::encode_message(m),
            Envelope::Snapshot(m) => codec::encode_message(m),
            Envelope::RequestResync(m) => codec::encode_message(m),
            Envelope::ActionError(m) => codec::encode_message(m),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        let packet = codec::decode_packet(buf)?;
        let payload = packet.payload;
        let env = match packet.msg_id {
            MsgId::Ping => Envelope::Ping(postcard::from_bytes(payload)?),
            MsgId::Pong => Envelope::Pong(postcard::from_bytes(payload)?),
            MsgId::Ice => Envelope::Ice(postcard::from_bytes(payload)?),
            MsgId::Action => Envelope::Action(postcard::from_bytes(payload)?),
            MsgId::Snapshot => Envelope::Snapshot(postcard::from_bytes(payload)?),
            MsgId::RequestResync => Envelope::RequestResync(postcard::from_bytes(payload)?),
            MsgId::ActionError => Envelope::ActionError(postcard::from_bytes(payload)?),
        };
        Ok(env)
    }
}
