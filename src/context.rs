use crate::core::{
    ChangeRecord, ChannelDescriptor, DataEvent, DataId, Node, OutgoingBatch, Result,
};
use crate::router::DataRouter;
use crate::services::{DataStore, StoreTransaction, TriggerRouterMap};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, event};

/// Timings and counters gathered during one channel pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingStats {
    /// Time spent inside `DataRouter::route_to_nodes`
    pub data_router_ms: u64,
    /// Time spent creating batches and writing data events
    pub insert_data_events_ms: u64,
    pub data_events_inserted: u64,
    pub batches_completed: u64,
    pub commits: u64,
}

/// State of one routing pass over one channel.
///
/// Owned by the routing loop that created it. All writes go through a single store
/// transaction that is begun on first use and replaced after every commit.
pub struct RoutingContext {
    source_node_id: String,
    channel: Arc<ChannelDescriptor>,
    store: Arc<dyn DataStore>,
    transaction: Option<Box<dyn StoreTransaction>>,
    batches_by_node: HashMap<String, OutgoingBatch>,
    available_nodes: HashMap<(String, String), Arc<Vec<Node>>>,
    trigger_routers: HashMap<bool, Arc<TriggerRouterMap>>,
    used_routers: BTreeMap<String, Arc<dyn DataRouter>>,
    data_events: Vec<DataEvent>,
    last_data_id_processed: DataId,
    last_transaction_id: Option<String>,
    encountered_transaction_boundary: bool,
    needs_committed: bool,
    stats: RoutingStats,
}

impl RoutingContext {
    pub fn new(
        source_node_id: impl Into<String>,
        channel: ChannelDescriptor,
        store: Arc<dyn DataStore>,
    ) -> Self {
        Self {
            source_node_id: source_node_id.into(),
            channel: Arc::new(channel),
            store,
            transaction: None,
            batches_by_node: HashMap::new(),
            available_nodes: HashMap::new(),
            trigger_routers: HashMap::new(),
            used_routers: BTreeMap::new(),
            data_events: Vec::new(),
            last_data_id_processed: 0,
            last_transaction_id: None,
            encountered_transaction_boundary: false,
            needs_committed: false,
            stats: RoutingStats::default(),
        }
    }

    /// Id of the node doing the routing.
    pub fn source_node_id(&self) -> &str {
        &self.source_node_id
    }

    pub fn channel(&self) -> &Arc<ChannelDescriptor> {
        &self.channel
    }

    // ========================================================================
    // Unit of work
    // ========================================================================

    /// The open store transaction, begun on first use.
    pub async fn transaction(&mut self) -> Result<&mut Box<dyn StoreTransaction>> {
        let transaction = match self.transaction.take() {
            Some(transaction) => transaction,
            None => self.store.begin().await?,
        };
        Ok(self.transaction.insert(transaction))
    }

    pub fn has_open_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Commits the open transaction, if any. The next write begins a new one.
    pub async fn commit(&mut self) -> Result<()> {
        if let Some(mut transaction) = self.transaction.take() {
            transaction.commit().await?;
            self.stats.commits += 1;
        }
        Ok(())
    }

    /// Discards all uncommitted work: the store transaction, open batches and buffered
    /// data events.
    pub async fn rollback(&mut self) {
        self.batches_by_node.clear();
        self.data_events.clear();
        self.needs_committed = false;
        if let Some(mut transaction) = self.transaction.take() {
            if let Err(err) = transaction.rollback().await {
                event!(
                    Level::WARN,
                    channel_id = %self.channel.channel_id,
                    error = %err,
                    "routing transaction rollback failed"
                );
            }
        }
    }

    /// Releases everything the context holds. Safe to call after a failure.
    pub async fn cleanup(&mut self) {
        if self.transaction.is_some() || !self.batches_by_node.is_empty() {
            event!(
                Level::DEBUG,
                channel_id = %self.channel.channel_id,
                open_batches = self.batches_by_node.len(),
                "discarding unfinished routing work"
            );
            self.rollback().await;
        }
        self.available_nodes.clear();
        self.trigger_routers.clear();
        self.used_routers.clear();
    }

    // ========================================================================
    // Open batches
    // ========================================================================

    pub fn batch(&self, node_id: &str) -> Option<&OutgoingBatch> {
        self.batches_by_node.get(node_id)
    }

    pub fn batch_mut(&mut self, node_id: &str) -> Option<&mut OutgoingBatch> {
        self.batches_by_node.get_mut(node_id)
    }

    pub fn put_batch(&mut self, batch: OutgoingBatch) {
        self.batches_by_node.insert(batch.node_id.clone(), batch);
    }

    pub fn batches_by_node(&self) -> &HashMap<String, OutgoingBatch> {
        &self.batches_by_node
    }

    /// Removes every open batch, ordered by node id.
    pub fn take_batches(&mut self) -> Vec<OutgoingBatch> {
        let mut batches: Vec<OutgoingBatch> =
            self.batches_by_node.drain().map(|(_, batch)| batch).collect();
        batches.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        batches
    }

    // ========================================================================
    // Buffered data events
    // ========================================================================

    pub fn add_data_event(&mut self, event: DataEvent) {
        self.data_events.push(event);
    }

    pub fn buffered_data_event_count(&self) -> usize {
        self.data_events.len()
    }

    pub fn take_data_events(&mut self) -> Vec<DataEvent> {
        std::mem::take(&mut self.data_events)
    }

    // ========================================================================
    // Per-pass caches
    // ========================================================================

    pub fn available_nodes(&self, key: &(String, String)) -> Option<Arc<Vec<Node>>> {
        self.available_nodes.get(key).cloned()
    }

    pub fn set_available_nodes(&mut self, key: (String, String), nodes: Arc<Vec<Node>>) {
        self.available_nodes.insert(key, nodes);
    }

    pub fn trigger_routers(&self, relay: bool) -> Option<Arc<TriggerRouterMap>> {
        self.trigger_routers.get(&relay).cloned()
    }

    pub fn set_trigger_routers(&mut self, relay: bool, routers: Arc<TriggerRouterMap>) {
        self.trigger_routers.insert(relay, routers);
    }

    pub fn add_used_router(&mut self, name: &str, router: Arc<dyn DataRouter>) {
        self.used_routers.entry(name.to_string()).or_insert(router);
    }

    /// Routers that routed at least one record in this pass, by name.
    pub fn used_routers(&self) -> Vec<Arc<dyn DataRouter>> {
        self.used_routers.values().cloned().collect()
    }

    // ========================================================================
    // Progress and transaction boundaries
    // ========================================================================

    pub fn last_data_id_processed(&self) -> DataId {
        self.last_data_id_processed
    }

    pub fn set_last_data_id_processed(&mut self, data_id: DataId) {
        self.last_data_id_processed = data_id;
    }

    /// Records `data` as the current record. A boundary is encountered when the next
    /// queued record belongs to a different source transaction, when there is no next
    /// record, or when `data` carries no transaction id.
    pub fn record_transaction_boundary(&mut self, data: &ChangeRecord, next: Option<&ChangeRecord>) {
        self.encountered_transaction_boundary = match (&data.transaction_id, next) {
            (None, _) | (_, None) => true,
            (Some(current), Some(next)) => next.transaction_id.as_ref() != Some(current),
        };
        self.last_transaction_id = data.transaction_id.clone();
    }

    pub fn is_encountered_transaction_boundary(&self) -> bool {
        self.encountered_transaction_boundary
    }

    pub fn last_transaction_id(&self) -> Option<&str> {
        self.last_transaction_id.as_deref()
    }

    pub fn needs_committed(&self) -> bool {
        self.needs_committed
    }

    pub fn set_needs_committed(&mut self, needs_committed: bool) {
        self.needs_committed = needs_committed;
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> &RoutingStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut RoutingStats {
        &mut self.stats
    }

    pub fn log_stats(&self, data_count: usize, elapsed: Duration) {
        event!(
            Level::INFO,
            channel_id = %self.channel.channel_id,
            data_count,
            elapsed_ms = elapsed.as_millis() as u64,
            data_router_ms = self.stats.data_router_ms,
            insert_data_events_ms = self.stats.insert_data_events_ms,
            data_events_inserted = self.stats.data_events_inserted,
            batches_completed = self.stats.batches_completed,
            commits = self.stats.commits,
            "channel routing statistics"
        );
    }
}
