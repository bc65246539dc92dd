// Shard - Storage contract for collations of one shard
//
// The sync layer only needs to add collations, look them up by hash and
// ask whether a header's body is available locally.

use crate::collation::model::{Collation, CollationHeader};
use crate::merkle::Hash32;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Shard storage errors
#[derive(Error, Debug, PartialEq)]
pub enum ShardError {
    #[error("Collation {0} not found")]
    NotFound(Hash32),

    #[error("Collation belongs to shard {got}, expected {expected}")]
    WrongShard { expected: u64, got: u64 },

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Whether a collation body is held locally
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
}

/// Collation storage for a single shard
pub trait Shard: Send + Sync {
    /// The shard this storage serves
    fn shard_id(&self) -> u64;

    /// Store a collation and mark it available
    fn add_collation(&self, collation: Collation) -> Result<(), ShardError>;

    /// Look up a collation by hash
    fn get_collation_by_hash(&self, hash: &Hash32) -> Result<Collation, ShardError>;

    /// Availability of the body behind `header`
    fn get_availability(&self, header: &CollationHeader) -> Availability;
}

/// In-memory shard
#[derive(Debug)]
pub struct MemoryShard {
    shard_id: u64,
    collations: RwLock<HashMap<Hash32, Collation>>,
}

impl MemoryShard {
    /// Create an empty shard
    pub fn new(shard_id: u64) -> Self {
        Self {
            shard_id,
            collations: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored collations
    pub fn len(&self) -> usize {
        self.collations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Shard for MemoryShard {
    fn shard_id(&self) -> u64 {
        self.shard_id
    }

    fn add_collation(&self, collation: Collation) -> Result<(), ShardError> {
        if collation.shard_id() != self.shard_id {
            return Err(ShardError::WrongShard {
                expected: self.shard_id,
                got: collation.shard_id(),
            });
        }
        self.collations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(collation.hash(), collation);
        Ok(())
    }

    fn get_collation_by_hash(&self, hash: &Hash32) -> Result<Collation, ShardError> {
        self.collations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .cloned()
            .ok_or(ShardError::NotFound(*hash))
    }

    fn get_availability(&self, header: &CollationHeader) -> Availability {
        let collations = self.collations.read().unwrap_or_else(PoisonError::into_inner);
        if collations.contains_key(&header.hash()) {
            Availability::Available
        } else {
            Availability::Unavailable
        }
    }
}
