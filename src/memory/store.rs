use crate::core::{
    BatchId, ChangeRecord, ChannelDescriptor, DataEvent, DataId, Node, OutgoingBatch, Result,
    RoutingError,
};
use crate::services::{ChangeRecordCursor, DataStore, StoreTransaction};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct StoreState {
    data: BTreeMap<DataId, ChangeRecord>,
    last_data_id: DataId,
    batches: BTreeMap<BatchId, OutgoingBatch>,
    /// Committed data events keyed by `(data_id, batch_id)`.
    data_events: BTreeMap<(DataId, BatchId), DataEvent>,
    reload_requests: Vec<String>,
    fail_next_commit: bool,
    rejected_data_ids: HashSet<DataId>,
    failing_channels: HashSet<String>,
    fail_read_at: Option<DataId>,
}

impl StoreState {
    fn is_routed(&self, data_id: DataId) -> bool {
        self.data_events
            .range((data_id, BatchId::MIN)..=(data_id, BatchId::MAX))
            .next()
            .is_some()
    }

    fn pending(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.data.values().filter(|record| !self.is_routed(record.data_id))
    }
}

/// A `DataStore` that keeps change records, batches and data events in memory.
///
/// A change record counts as routed once a committed data event references it. Writes made
/// through a transaction are staged and applied only by `commit`, so a failed pass leaves the
/// store exactly as it was. Failures can be injected to exercise the error paths.
#[derive(Clone)]
pub struct MemoryDataStore {
    state: Arc<Mutex<StoreState>>,
    next_batch_id: Arc<AtomicU64>,
    open_cursors: Arc<AtomicUsize>,
    bulk_insert: Arc<AtomicBool>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            next_batch_id: Arc::new(AtomicU64::new(1)),
            open_cursors: Arc::new(AtomicUsize::new(0)),
            bulk_insert: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Store that writes every data event on its own instead of buffering them.
    pub fn without_bulk_insert(self) -> Self {
        self.bulk_insert.store(false, Ordering::SeqCst);
        self
    }

    fn read(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a captured change and returns its assigned id.
    pub fn append_data(&self, mut record: ChangeRecord) -> DataId {
        let mut state = self.read();
        state.last_data_id += 1;
        record.data_id = state.last_data_id;
        state.data.insert(record.data_id, record);
        state.last_data_id
    }

    /// Committed batches in id order.
    pub fn outgoing_batches(&self) -> Vec<OutgoingBatch> {
        self.read().batches.values().cloned().collect()
    }

    /// Committed data events ordered by data id, then batch id.
    pub fn data_events(&self) -> Vec<DataEvent> {
        self.read().data_events.values().cloned().collect()
    }

    /// Ids of change records with no committed data event, ascending.
    pub fn unrouted_data_ids(&self) -> Vec<DataId> {
        self.read().pending().map(|record| record.data_id).collect()
    }

    /// Node ids a reload was queued for, in request order.
    pub fn reload_requests(&self) -> Vec<String> {
        self.read().reload_requests.clone()
    }

    /// Cursors opened and not yet closed.
    pub fn open_cursor_count(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Makes the next commit fail and discard its staged writes.
    pub fn fail_next_commit(&self) {
        self.read().fail_next_commit = true;
    }

    /// Makes every data event for `data_id` fail as a duplicate.
    pub fn reject_data_event(&self, data_id: DataId) {
        self.read().rejected_data_ids.insert(data_id);
    }

    /// Makes `select_data_to_route` fail for `channel_id`.
    pub fn fail_select_for_channel(&self, channel_id: impl Into<String>) {
        self.read().failing_channels.insert(channel_id.into());
    }

    /// Makes cursors fail when they reach `data_id`.
    pub fn fail_read_at(&self, data_id: DataId) {
        self.read().fail_read_at = Some(data_id);
    }
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    fn supports_bulk_insert(&self) -> bool {
        self.bulk_insert.load(Ordering::SeqCst)
    }

    async fn select_data_to_route(
        &self,
        channel: &ChannelDescriptor,
    ) -> Result<Box<dyn ChangeRecordCursor>> {
        let state = self.state.lock()?;
        if state.failing_channels.contains(&channel.channel_id) {
            return Err(RoutingError::Storage(format!(
                "cannot select data for channel '{}'",
                channel.channel_id
            )));
        }

        let records: VecDeque<ChangeRecord> = state
            .pending()
            .filter(|record| record.channel_id == channel.channel_id)
            .cloned()
            .collect();
        let fail_at = state.fail_read_at;
        drop(state);

        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCursor {
            records,
            fail_at,
            open_cursors: self.open_cursors.clone(),
            closed: false,
        }))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            next_batch_id: self.next_batch_id.clone(),
            batches: BTreeMap::new(),
            data_events: BTreeMap::new(),
        }))
    }

    async fn count_unrouted(&self, channel_id: &str, after_data_id: DataId) -> Result<u64> {
        let state = self.state.lock()?;
        Ok(state
            .pending()
            .filter(|record| record.channel_id == channel_id && record.data_id > after_data_id)
            .count() as u64)
    }

    async fn insert_reload_events(&self, node: &Node) -> Result<()> {
        self.state.lock()?.reload_requests.push(node.node_id.clone());
        Ok(())
    }

    async fn max_routed_data_id(&self) -> Result<Option<DataId>> {
        let state = self.state.lock()?;
        Ok(state.data_events.keys().map(|(data_id, _)| *data_id).max())
    }

    async fn unrouted_data_ids_below(&self, data_id: DataId) -> Result<Vec<DataId>> {
        let state = self.state.lock()?;
        Ok(state
            .pending()
            .map(|record| record.data_id)
            .take_while(|id| *id < data_id)
            .collect())
    }
}

struct MemoryCursor {
    records: VecDeque<ChangeRecord>,
    fail_at: Option<DataId>,
    open_cursors: Arc<AtomicUsize>,
    closed: bool,
}

#[async_trait]
impl ChangeRecordCursor for MemoryCursor {
    async fn next(&mut self) -> Result<Option<ChangeRecord>> {
        if self.closed {
            return Err(RoutingError::Reader("cursor is closed".to_string()));
        }
        match self.records.pop_front() {
            Some(record) if Some(record.data_id) == self.fail_at => Err(RoutingError::Reader(
                format!("failed to read change record {}", record.data_id),
            )),
            record => Ok(record),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Staged writes of one unit of work.
struct MemoryTransaction {
    state: Arc<Mutex<StoreState>>,
    next_batch_id: Arc<AtomicU64>,
    batches: BTreeMap<BatchId, OutgoingBatch>,
    data_events: BTreeMap<(DataId, BatchId), DataEvent>,
}

impl MemoryTransaction {
    fn stage_data_event(&mut self, state: &StoreState, event: &DataEvent) -> Result<()> {
        let key = (event.data_id, event.batch_id);
        if state.rejected_data_ids.contains(&event.data_id)
            || state.data_events.contains_key(&key)
            || self.data_events.contains_key(&key)
        {
            return Err(RoutingError::DataIntegrity(format!(
                "data event for data {} in batch {} already exists",
                event.data_id, event.batch_id
            )));
        }
        self.data_events.insert(key, event.clone());
        Ok(())
    }

    fn discard(&mut self) {
        self.batches.clear();
        self.data_events.clear();
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_outgoing_batch(&mut self, batch: &mut OutgoingBatch) -> Result<()> {
        batch.batch_id = self.next_batch_id.fetch_add(1, Ordering::SeqCst);
        self.batches.insert(batch.batch_id, batch.clone());
        Ok(())
    }

    async fn update_outgoing_batch(&mut self, batch: &OutgoingBatch) -> Result<()> {
        let known = self.batches.contains_key(&batch.batch_id)
            || self.state.lock()?.batches.contains_key(&batch.batch_id);
        if !known {
            return Err(RoutingError::Storage(format!(
                "outgoing batch {} does not exist",
                batch.batch_id
            )));
        }
        self.batches.insert(batch.batch_id, batch.clone());
        Ok(())
    }

    async fn insert_data_event(&mut self, event: &DataEvent) -> Result<()> {
        let state = self.state.clone();
        let state = state.lock()?;
        self.stage_data_event(&state, event)
    }

    async fn insert_data_events(&mut self, events: &[DataEvent]) -> Result<usize> {
        let state = self.state.clone();
        let state = state.lock()?;
        let written = events
            .iter()
            .filter(|event| self.stage_data_event(&state, event).is_ok())
            .count();
        Ok(written)
    }

    async fn commit(&mut self) -> Result<()> {
        let mut state = self.state.lock()?;
        if state.fail_next_commit {
            state.fail_next_commit = false;
            drop(state);
            self.discard();
            return Err(RoutingError::Storage("commit failed".to_string()));
        }
        state.batches.append(&mut self.batches);
        state.data_events.append(&mut self.data_events);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.discard();
        Ok(())
    }
}
