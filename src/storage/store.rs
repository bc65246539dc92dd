// ShardStore - Persistent collation storage using sled
//
// Implements the Shard contract on disk:
// - Collations keyed by hash
// - Availability markers keyed by header hash
// - The shard id the database was created for

use crate::collation::{Availability, Collation, CollationHeader, Shard, ShardError};
use crate::merkle::Hash32;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Key prefixes for organizing data
mod keys {
    pub const COLLATION_PREFIX: &[u8] = b"collation:";
    pub const AVAILABLE_PREFIX: &[u8] = b"available:";
    pub const SHARD_ID: &[u8] = b"shard:id";
}

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Database belongs to shard {stored}, opened as shard {requested}")]
    ShardMismatch { stored: u64, requested: u64 },

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

impl From<StoreError> for ShardError {
    fn from(err: StoreError) -> Self {
        ShardError::Storage(err.to_string())
    }
}

/// Statistics about the storage
#[derive(Clone, Debug)]
pub struct StorageStats {
    /// Number of stored collations
    pub collation_count: usize,
    /// Approximate disk size in bytes
    pub disk_size_bytes: u64,
}

/// Persistent collation store for one shard
///
/// Uses sled for crash-safe, embedded storage. A collation and its
/// availability marker are written in one batch.
pub struct ShardStore {
    db: sled::Db,
    shard_id: u64,
}

impl ShardStore {
    /// Open or create a store for `shard_id` at the given path
    pub fn open<P: AsRef<Path>>(path: P, shard_id: u64) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;

        match db.get(keys::SHARD_ID)? {
            Some(bytes) => {
                let stored = decode_u64(&bytes)?;
                if stored != shard_id {
                    return Err(StoreError::ShardMismatch {
                        stored,
                        requested: shard_id,
                    });
                }
            }
            None => {
                db.insert(keys::SHARD_ID, &shard_id.to_be_bytes()[..])?;
            }
        }

        Ok(Self { db, shard_id })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    /// Get storage statistics
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            collation_count: self.db.scan_prefix(keys::COLLATION_PREFIX).count(),
            disk_size_bytes: self.db.size_on_disk().unwrap_or(0),
        }
    }

    /// Hashes of all stored collations
    pub fn collation_hashes(&self) -> Result<Vec<Hash32>, StoreError> {
        let mut hashes = Vec::new();
        for result in self.db.scan_prefix(keys::COLLATION_PREFIX) {
            let (key, _) = result?;
            let raw = <[u8; 32]>::try_from(&key[keys::COLLATION_PREFIX.len()..])
                .map_err(|_| StoreError::DeserializationFailed("Invalid hash key".to_string()))?;
            hashes.push(Hash32::from_bytes(raw));
        }
        Ok(hashes)
    }

    fn load_collation(&self, hash: &Hash32) -> Result<Option<Collation>, StoreError> {
        match self.db.get(collation_key(hash))? {
            Some(bytes) => {
                let collation = postcard::from_bytes(&bytes)
                    .map_err(|e| StoreError::DeserializationFailed(e.to_string()))?;
                Ok(Some(collation))
            }
            None => Ok(None),
        }
    }
}

fn collation_key(hash: &Hash32) -> Vec<u8> {
    [keys::COLLATION_PREFIX, hash.as_bytes()].concat()
}

fn available_key(hash: &Hash32) -> Vec<u8> {
    [keys::AVAILABLE_PREFIX, hash.as_bytes()].concat()
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StoreError> {
    let raw = <[u8; 8]>::try_from(bytes)
        .map_err(|_| StoreError::DeserializationFailed("Invalid shard id length".to_string()))?;
    Ok(u64::from_be_bytes(raw))
}

impl Shard for ShardStore {
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

        let hash = collation.hash();
        let bytes = postcard::to_allocvec(&collation)
            .map_err(|e| ShardError::Storage(e.to_string()))?;

        let mut batch = sled::Batch::default();
        batch.insert(collation_key(&hash), bytes);
        batch.insert(available_key(&hash), &[1u8][..]);
        self.db
            .apply_batch(batch)
            .map_err(|e| ShardError::Storage(e.to_string()))?;
        Ok(())
    }

    fn get_collation_by_hash(&self, hash: &Hash32) -> Result<Collation, ShardError> {
        self.load_collation(hash)?
            .ok_or(ShardError::NotFound(*hash))
    }

    fn get_availability(&self, header: &CollationHeader) -> Availability {
        match self.db.contains_key(available_key(&header.hash())) {
            Ok(true) => Availability::Available,
            Ok(false) => Availability::Unavailable,
            Err(e) => {
                warn!(error = %e, "availability lookup failed, treating as unavailable");
                Availability::Unavailable
            }
        }
    }
}
