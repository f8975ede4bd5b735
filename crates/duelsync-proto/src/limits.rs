//! Message size limits for the duelsync protocol.
//!
//! Single source of truth for payload limits, so the encoder and decoder
//! reject the same frames.

use crate::msg_id::MsgId;

/// Maximum payload size for control messages (4 KB).
///
/// Control messages include ping/pong, ICE candidates, resync requests and
/// action errors.
pub const MAX_CONTROL_PAYLOAD: usize = 4 * 1024;

/// Maximum payload size for data messages (1 MB).
///
/// Data messages carry actions and full state snapshots.
pub const MAX_DATA_PAYLOAD: usize = 1024 * 1024;

/// Returns `true` if the given message ID may carry a game payload.
#[inline]
pub const fn is_data_message(msg_id: MsgId) -> bool {
    matches!(msg_id, MsgId::Action | MsgId::Snapshot)
}

/// Returns the maximum payload size allowed for the given message ID.
#[inline]
pub const fn max_payload_for(msg_id: MsgId) -> usize {
    if is_data_message(msg_id) {
        MAX_DATA_PAYLOAD
    } else {
        MAX_CONTROL_PAYLOAD
    }
}
