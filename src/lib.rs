// ============================================================================
// changeroute Library
// ============================================================================

pub mod batching;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod core;
pub mod memory;
pub mod pipeline;
pub mod router;
pub mod services;

// Re-export main types for convenience
pub use batching::{BatchAlgorithm, BatchAlgorithmRegistry};
pub use config::RoutingConfig;
pub use context::{RoutingContext, RoutingStats};
pub use coordinator::{RoutingCoordinator, RoutingPassSummary};
pub use core::{
    BatchStatus, ChangeRecord, ChannelDescriptor, DataEvent, DataId, EventKind, Node,
    NodeGroupLink, NodeSecurity, OutgoingBatch, Result, RouterDefinition, RoutingError,
    TriggerRouter, UNROUTED_NODE_ID,
};
pub use router::{DataMetaData, DataRouter, RouterRegistry};

// Re-export collaborator traits
pub use services::{
    ChangeRecordCursor, ClusterLock, DataStore, GapDetector, StatisticSink, StoreTransaction,
    Topology,
};

// ============================================================================
// Quick start
// ============================================================================

/// Common imports for routing with the in-memory collaborators.
///
/// # Examples
///
/// ```
/// use changeroute::prelude::*;
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let topology = Arc::new(MemoryTopology::new());
/// topology.set_identity(Node::new("corp", "corp"));
/// topology.add_node(Node::new("store-1", "store"));
/// topology.add_group_link(NodeGroupLink::new("corp", "store"));
/// topology.set_channel(ChannelDescriptor::new("sales"));
/// topology.add_trigger_router(TriggerRouter::new(
///     "orders",
///     RouterDefinition::new("corp_to_store", "corp", "store"),
/// ));
///
/// let store = Arc::new(MemoryDataStore::new());
/// store.append_data(ChangeRecord::new("orders", "orders", EventKind::Insert, "sales"));
///
/// let coordinator = RoutingCoordinator::new(
///     RoutingConfig::default(),
///     Arc::new(MemoryClusterLock::new("server-1")),
///     topology,
///     store.clone(),
///     Arc::new(MemoryStatistics::new()),
/// )?;
///
/// let summary = tokio_test::block_on(coordinator.run_routing_pass());
/// assert_eq!(summary.data_routed, 1);
/// assert_eq!(store.outgoing_batches()[0].node_id, "store-1");
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::memory::{MemoryClusterLock, MemoryDataStore, MemoryStatistics, MemoryTopology};
    pub use crate::{
        ChangeRecord, ChannelDescriptor, EventKind, Node, NodeGroupLink, RouterDefinition,
        RoutingConfig, RoutingCoordinator, TriggerRouter,
    };
}
