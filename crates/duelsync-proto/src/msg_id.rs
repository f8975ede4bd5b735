use strum::FromRepr;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
pub enum MsgId {
    Ping = 1,
    Pong = 2,
    Ice = 3,

    Action = 10,
    Snapshot = 11,
    RequestResync = 12,
    ActionError = 13,
}
