use duelsync_proto::{StateHash, messages::sync::ActionErrorCode};

use crate::connection::{ConnectionState, PresenceLevel};

/// Observable session events, delivered to [`SessionHooks::on_event`] and
/// the driver's event channel.
///
/// [`SessionHooks::on_event`]: crate::hooks::SessionHooks::on_event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StatusChanged(ConnectionState),
    PresenceChanged(PresenceLevel),
    /// A local or remote move (or turn override) was applied.
    StateAdvanced {
        turn_number: u64,
        hash: StateHash,
        remote: bool,
    },
    /// Local hash disagreed with the peer's. Non-fatal.
    Diverged {
        local: StateHash,
        remote: Option<StateHash>,
    },
    ResyncRequested {
        to_hash: StateHash,
    },
    /// A snapshot was adopted after a mismatch.
    ResyncCompleted {
        hash: StateHash,
    },
    /// Resync attempt cap exceeded. Local state is untrusted until a snapshot
    /// is received or pushed.
    DivergenceUnresolved {
        local: StateHash,
    },
    /// The peer rejected one of our actions.
    ActionRejectedByPeer {
        code: ActionErrorCode,
        message: String,
    },
    /// We rejected one of the peer's actions and replied with `actionError`.
    PeerActionRejected {
        code: ActionErrorCode,
        message: String,
    },
    /// Malformed or unknown inbound message, dropped.
    InvalidAction {
        reason: String,
    },
    /// Buffered actions were transmitted after reconnecting.
    PendingFlushed {
        count: usize,
    },
    /// The debounce expired; the host should renegotiate the transport.
    ReconnectDue,
    /// Trickled ICE candidate for the signaling collaborator.
    IceCandidate(String),
}
