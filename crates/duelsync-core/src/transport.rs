//! Boundaries to the external transport and signaling collaborators.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport send buffer full")]
    Backpressure,

    #[error("transport error: {0}")]
    Other(String),
}

/// Best-effort byte message channel to one peer.
///
/// Delivery may reorder or drop messages. Inbound messages and open/close
/// signals are fed to the session by the owner of the transport
/// (`GameSession::handle_message`, `on_transport_open`,
/// `on_transport_close`).
pub trait Transport: Send {
    fn send(&mut self, bytes: Bytes) -> Result<(), TransportError>;
}

/// Opaque session description exchanged during signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription(pub String);

/// Offer/answer negotiation. The sync core only passes values through.
pub trait Signaling: Send {
    fn create_offer(&mut self) -> Result<SessionDescription, TransportError>;

    fn apply_answer(&mut self, answer: SessionDescription) -> Result<(), TransportError>;

    fn set_remote_offer_and_answer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError>;
}

/// [`Transport`] backed by a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Transport plus the receiving end of its outbound queue.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, bytes: Bytes) -> Result<(), TransportError> {
        self.tx.try_send(bytes).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}
