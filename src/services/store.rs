use crate::core::{
    ChangeRecord, ChannelDescriptor, DataEvent, DataId, Node, OutgoingBatch, Result,
};
use async_trait::async_trait;

/// Ascending scan over the change records of one channel that still need routing.
#[async_trait]
pub trait ChangeRecordCursor: Send {
    async fn next(&mut self) -> Result<Option<ChangeRecord>>;

    /// Releases the underlying result set. Must be safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// One unit of routing work.
///
/// Nothing written through a transaction is visible until `commit` succeeds. Dropping a
/// transaction that was neither committed nor rolled back discards its work.
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    /// Persists a new batch and assigns its `batch_id`.
    async fn insert_outgoing_batch(&mut self, batch: &mut OutgoingBatch) -> Result<()>;

    async fn update_outgoing_batch(&mut self, batch: &OutgoingBatch) -> Result<()>;

    /// Fails with `RoutingError::DataIntegrity` when the event already exists.
    async fn insert_data_event(&mut self, event: &DataEvent) -> Result<()>;

    /// Bulk variant of `insert_data_event`. Duplicates are skipped; returns the number of
    /// events written.
    async fn insert_data_events(&mut self, events: &[DataEvent]) -> Result<usize>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Whether data events should be buffered and written with `insert_data_events`.
    fn supports_bulk_insert(&self) -> bool;

    async fn select_data_to_route(
        &self,
        channel: &ChannelDescriptor,
    ) -> Result<Box<dyn ChangeRecordCursor>>;

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Records on `channel_id` with an id above `after_data_id` that have not been routed.
    async fn count_unrouted(&self, channel_id: &str, after_data_id: DataId) -> Result<u64>;

    /// Queues a full resend of the replicated tables for `node`.
    async fn insert_reload_events(&self, node: &Node) -> Result<()>;

    /// Highest change record id that has been routed, across all channels.
    async fn max_routed_data_id(&self) -> Result<Option<DataId>>;

    /// Unrouted change record ids below `data_id`, ascending.
    async fn unrouted_data_ids_below(&self, data_id: DataId) -> Result<Vec<DataId>>;
}
