// Sync module - HOW SHARD NODES TALK
// Collation proposal, per-peer message loops and delta gossip

mod clock;
mod config;
mod deadline;
mod engine;

pub use clock::{ManualPeriodClock, PeriodSource, SystemPeriodClock};
pub use config::{SyncConfig, COLLATION_PERIOD_SECS, COLLATION_SIZE};
pub use deadline::deadline_token;
pub use engine::{PeerPoolEvent, SyncEngine, SyncError, SyncStats};
