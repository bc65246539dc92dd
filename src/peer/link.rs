// Peer Link - The frame pipe underneath a session
//
// A link is a pair of frame channels. Any transport that can deliver whole
// frames in order can produce one; `PeerLink::pair` wires two sessions
// together in-process.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Unique identifier for a peer
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Generate a random peer ID
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

/// Bidirectional, ordered frame channel to one remote peer
#[derive(Debug)]
pub struct PeerLink {
    pub(crate) outbound: mpsc::UnboundedSender<Vec<u8>>,
    pub(crate) inbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl PeerLink {
    /// Build a link from raw frame channels
    pub fn new(
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// Two links connected back to back
    pub fn pair() -> (PeerLink, PeerLink) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (PeerLink::new(a_tx, a_rx), PeerLink::new(b_tx, b_rx))
    }

    /// Split into the raw channels
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<Vec<u8>>,
        mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        (self.outbound, self.inbound)
    }
}
