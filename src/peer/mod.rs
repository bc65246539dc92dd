// Peer module - ONE CONNECTION
// Per-peer session: handshake, request/reply correlation, known hashes

mod link;
mod session;

pub use link::{PeerId, PeerLink};
pub use session::{DisconnectReason, PeerRequest, PeerSession, SessionError, SessionState};
