//! Collaborators the routing core talks to.
//!
//! Everything behind these traits is plain I/O: persistence of change records and
//! batches, topology lookups, the cluster lock and statistics. The `memory` module
//! provides implementations that keep all state in process.

pub mod cluster;
pub mod gap;
pub mod stats;
pub mod store;
pub mod topology;

pub use cluster::ClusterLock;
pub use gap::{DataGap, GapDetector, NoopGapDetector, UnroutedGapDetector};
pub use stats::StatisticSink;
pub use store::{ChangeRecordCursor, DataStore, StoreTransaction};
pub use topology::{Topology, TriggerRouterMap};
