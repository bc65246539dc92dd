// Storage module - PERSISTENCE
// Sled-backed implementation of the shard storage contract

mod store;

pub use store::{ShardStore, StorageStats, StoreError};
