// Collation - A shard block: header plus fixed-size body
//
// Collations are immutable once built. The collation hash is the
// Keccak-256 of the encoded header, so two collations with equal headers
// share an identity.

use crate::merkle::{keccak256, Hash32};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 20-byte address of a collation proposer
pub type ProposerAddress = [u8; 20];

/// Header of a collation
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollationHeader {
    shard_id: u64,
    chunk_root: Hash32,
    period: u64,
    proposer_address: ProposerAddress,
}

impl CollationHeader {
    /// Create a new header
    pub fn new(
        shard_id: u64,
        chunk_root: Hash32,
        period: u64,
        proposer_address: ProposerAddress,
    ) -> Self {
        Self {
            shard_id,
            chunk_root,
            period,
            proposer_address,
        }
    }

    pub fn shard_id(&self) -> u64 {
        self.shard_id
    }

    pub fn chunk_root(&self) -> Hash32 {
        self.chunk_root
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn proposer_address(&self) -> &ProposerAddress {
        &self.proposer_address
    }

    /// Canonical encoding used for hashing
    pub fn to_bytes(&self) -> Vec<u8> {
        postcard::to_allocvec(self).unwrap_or_default()
    }

    /// Header hash, which is also the collation hash
    pub fn hash(&self) -> Hash32 {
        keccak256([self.to_bytes().as_slice()])
    }
}

/// A collation: header and body
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collation {
    header: CollationHeader,
    body: Vec<u8>,
}

impl Collation {
    /// Create a new collation
    pub fn new(header: CollationHeader, body: Vec<u8>) -> Self {
        Self { header, body }
    }

    pub fn header(&self) -> &CollationHeader {
        &self.header
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The collation hash (hash of the header)
    pub fn hash(&self) -> Hash32 {
        self.header.hash()
    }

    /// Shortcut for the header's period
    pub fn period(&self) -> u64 {
        self.header.period
    }

    pub fn shard_id(&self) -> u64 {
        self.header.shard_id
    }
}

impl fmt::Debug for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bodies are large; print the identity only
        f.debug_struct("Collation")
            .field("hash", &self.hash())
            .field("shard_id", &self.header.shard_id)
            .field("period", &self.header.period)
            .field("body_len", &self.body.len())
            .finish()
    }
}
