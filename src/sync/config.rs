// Sync Config - Tunables for the sync engine

use crate::collation::ProposerAddress;
use crate::merkle::CHUNK_SIZE;
use crate::sync::engine::SyncError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default collation body size: 2^20 bytes
pub const COLLATION_SIZE: usize = 1 << 20;

/// Default period length in seconds
pub const COLLATION_PERIOD_SECS: u64 = 1;

/// Configuration for the sync engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Human-readable node name, also the content of proposed bodies
    pub node_name: String,
    /// Size of a collation body in bytes
    pub collation_size: usize,
    /// Length of one period in seconds
    pub period_length_secs: u64,
    /// How long a collation fetch may wait for its reply
    pub request_timeout_secs: u64,
    /// Proposer address written into proposed headers
    pub proposer_address: ProposerAddress,
    /// Reject fetched collations whose body does not match the chunk root
    pub verify_chunk_roots: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            node_name: "shard-sync".to_string(),
            collation_size: COLLATION_SIZE,
            period_length_secs: COLLATION_PERIOD_SECS,
            request_timeout_secs: 10,
            proposer_address: [0x11; 20],
            verify_chunk_roots: true,
        }
    }
}

impl SyncConfig {
    /// Create a new config builder
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_name(mut self, name: &str) -> Self {
        self.node_name = name.to_string();
        self
    }

    pub fn with_collation_size(mut self, size: usize) -> Self {
        self.collation_size = size;
        self
    }

    pub fn with_period_length(mut self, secs: u64) -> Self {
        self.period_length_secs = secs;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_proposer_address(mut self, address: ProposerAddress) -> Self {
        self.proposer_address = address;
        self
    }

    pub fn with_verify_chunk_roots(mut self, verify: bool) -> Self {
        self.verify_chunk_roots = verify;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn period_length(&self) -> Duration {
        Duration::from_secs(self.period_length_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.collation_size < CHUNK_SIZE
            || self.collation_size % CHUNK_SIZE != 0
            || !(self.collation_size / CHUNK_SIZE).is_power_of_two()
        {
            return Err(SyncError::InvalidConfig(format!(
                "collation_size {} must be a power-of-two number of {}-byte chunks",
                self.collation_size, CHUNK_SIZE
            )));
        }
        if self.period_length_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "period_length_secs cannot be 0".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}
