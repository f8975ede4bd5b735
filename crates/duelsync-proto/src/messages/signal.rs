use serde::{Deserialize, Serialize};

/// Trickled ICE candidate. Opaque to the sync core; forwarded to signaling.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
}
