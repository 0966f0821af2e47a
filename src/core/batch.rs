use super::types::{BatchId, EventKind, UNROUTED_NODE_ID};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outgoing batch lifecycle.
///
/// ```text
/// Routing ──commit──> New (ready for extraction)
/// Ok                  (unrouted sentinel, nothing to deliver)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Still accumulating events inside an open routing transaction
    Routing,
    /// Closed by the router and waiting to be extracted
    New,
    /// Terminal; used for the unrouted sentinel
    Ok,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Routing => write!(f, "RT"),
            BatchStatus::New => write!(f, "NE"),
            BatchStatus::Ok => write!(f, "OK"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingBatch {
    /// Assigned by the store when the batch is first inserted; 0 until then.
    pub batch_id: BatchId,
    pub node_id: String,
    pub channel_id: String,
    pub status: BatchStatus,
    pub insert_event_count: u64,
    pub update_event_count: u64,
    pub delete_event_count: u64,
    pub other_event_count: u64,
    pub data_event_count: u64,
    pub create_time: DateTime<Utc>,
    pub router_millis: u64,
}

impl OutgoingBatch {
    pub fn new(
        node_id: impl Into<String>,
        channel_id: impl Into<String>,
        status: BatchStatus,
    ) -> Self {
        Self {
            batch_id: 0,
            node_id: node_id.into(),
            channel_id: channel_id.into(),
            status,
            insert_event_count: 0,
            update_event_count: 0,
            delete_event_count: 0,
            other_event_count: 0,
            data_event_count: 0,
            create_time: Utc::now(),
            router_millis: 0,
        }
    }

    /// Opens a batch for `node_id`; the unrouted sentinel is born terminal.
    pub fn open_for(node_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        let status = if node_id == UNROUTED_NODE_ID {
            BatchStatus::Ok
        } else {
            BatchStatus::Routing
        };
        Self::new(node_id, channel_id, status)
    }

    pub fn is_unrouted(&self) -> bool {
        self.node_id == UNROUTED_NODE_ID
    }

    pub fn increment_event_count(&mut self, kind: EventKind) {
        match kind {
            EventKind::Insert => self.insert_event_count += 1,
            EventKind::Update => self.update_event_count += 1,
            EventKind::Delete => self.delete_event_count += 1,
            EventKind::Reload => self.other_event_count += 1,
        }
    }

    pub fn increment_data_event_count(&mut self) {
        self.data_event_count += 1;
    }

    /// Stamps how long the batch stayed open.
    pub fn record_router_millis(&mut self, now: DateTime<Utc>) {
        let elapsed = now.signed_duration_since(self.create_time).num_milliseconds();
        self.router_millis = elapsed.max(0) as u64;
    }
}
