//! In-memory implementations of the routing collaborators.
//!
//! They let the coordinator run end to end without a database and honor the same
//! transactional contract a database-backed store would.

pub mod cluster;
pub mod stats;
pub mod store;
pub mod topology;

pub use cluster::MemoryClusterLock;
pub use stats::{ChannelStatistics, MemoryStatistics};
pub use store::MemoryDataStore;
pub use topology::MemoryTopology;
