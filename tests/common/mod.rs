#![allow(dead_code)]

use changeroute::memory::{MemoryClusterLock, MemoryDataStore, MemoryStatistics, MemoryTopology};
use changeroute::{
    ChangeRecord, ChannelDescriptor, DataId, EventKind, Node, NodeGroupLink, RouterDefinition,
    RoutingConfig, RoutingCoordinator, TriggerRouter,
};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const CORP: &str = "corp";
pub const STORE_A: &str = "store-a";
pub const STORE_B: &str = "store-b";

/// A corp node routing the `orders` trigger on channel `sales` to two store nodes.
pub struct Harness {
    pub topology: Arc<MemoryTopology>,
    pub store: Arc<MemoryDataStore>,
    pub lock: MemoryClusterLock,
    pub statistics: Arc<MemoryStatistics>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(MemoryDataStore::new())
    }

    pub fn with_store(store: MemoryDataStore) -> Self {
        let topology = MemoryTopology::new();
        topology.set_identity(Node::new(CORP, "corp"));
        topology.add_node(Node::new(STORE_A, "store").with_external_id("east"));
        topology.add_node(Node::new(STORE_B, "store").with_external_id("west"));
        topology.add_group_link(NodeGroupLink::new("corp", "store"));
        topology.set_channel(ChannelDescriptor::new("sales"));
        topology.add_trigger_router(TriggerRouter::new(
            "orders",
            RouterDefinition::new("corp_to_store", "corp", "store"),
        ));

        Self {
            topology: Arc::new(topology),
            store: Arc::new(store),
            lock: MemoryClusterLock::new("server-1"),
            statistics: Arc::new(MemoryStatistics::new()),
        }
    }

    pub fn coordinator(&self) -> RoutingCoordinator {
        self.coordinator_with(RoutingConfig::default())
    }

    pub fn coordinator_with(&self, config: RoutingConfig) -> RoutingCoordinator {
        RoutingCoordinator::new(
            config,
            Arc::new(self.lock.clone()),
            self.topology.clone(),
            self.store.clone(),
            self.statistics.clone(),
        )
        .unwrap()
    }

    pub fn capture(&self, record: ChangeRecord) -> DataId {
        self.store.append_data(record)
    }

    /// Captures `count` inserts on `orders`, each in its own transaction.
    pub fn capture_orders(&self, count: usize) -> Vec<DataId> {
        (0..count)
            .map(|i| self.capture(order().with_transaction(format!("tx-{}", i))))
            .collect()
    }

    /// Node ids each routed change record went to, from committed data events.
    pub fn destinations(&self) -> BTreeMap<DataId, Vec<String>> {
        let batches: BTreeMap<u64, String> = self
            .store
            .outgoing_batches()
            .into_iter()
            .map(|batch| (batch.batch_id, batch.node_id))
            .collect();

        let mut destinations: BTreeMap<DataId, Vec<String>> = BTreeMap::new();
        for event in self.store.data_events() {
            let node_id = batches.get(&event.batch_id).cloned().unwrap_or_default();
            destinations.entry(event.data_id).or_default().push(node_id);
        }
        for node_ids in destinations.values_mut() {
            node_ids.sort();
        }
        destinations
    }

    /// Data event counts of the committed batches for `node_id`, in batch id order.
    pub fn batch_sizes(&self, node_id: &str) -> Vec<u64> {
        self.store
            .outgoing_batches()
            .into_iter()
            .filter(|batch| batch.node_id == node_id)
            .map(|batch| batch.data_event_count)
            .collect()
    }
}

pub fn order() -> ChangeRecord {
    ChangeRecord::new("orders", "orders", EventKind::Insert, "sales")
}

pub fn nodes(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}
