//! Collation sync for sharded chains.
//!
//! Peers speak the `sha` sub-protocol: they handshake with `Status`,
//! announce new collations with `NewCollationHashes`, and fetch bodies with
//! `GetCollations`/`Collations`, replies being matched to requests by id.
//! A binary Merkle tree provides the chunk root committing to each body.

pub mod collation;
pub mod merkle;
pub mod peer;
pub mod protocol;
pub mod storage;
pub mod sync;

pub use collation::{Availability, Collation, CollationHeader, MemoryShard, Shard, ShardError};
pub use merkle::{Hash32, MerkleError, MerkleTree};
pub use peer::{PeerId, PeerLink, PeerSession, SessionError};
pub use protocol::Command;
pub use sync::{PeerPoolEvent, SyncConfig, SyncEngine, SyncError};
