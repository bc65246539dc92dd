// Collation module - SHARD BLOCKS
// Collation data model and the shard storage contract

mod model;
mod shard;

pub use model::{Collation, CollationHeader, ProposerAddress};
pub use shard::{Availability, MemoryShard, Shard, ShardError};
