use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Identifier of a captured change record. Assigned in capture order.
pub type DataId = u64;

/// Identifier of an outgoing batch.
pub type BatchId = u64;

/// Pseudo-node that collects change records with no real destination.
pub const UNROUTED_NODE_ID: &str = "-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
    /// Full-row resend generated by an initial load.
    Reload,
}

impl EventKind {
    pub fn code(&self) -> &'static str {
        match self {
            EventKind::Insert => "I",
            EventKind::Update => "U",
            EventKind::Delete => "D",
            EventKind::Reload => "R",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "I" => Some(EventKind::Insert),
            "U" => Some(EventKind::Update),
            "D" => Some(EventKind::Delete),
            "R" => Some(EventKind::Reload),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One captured row mutation waiting to be routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub data_id: DataId,
    pub trigger_id: String,
    pub table_name: String,
    pub event_kind: EventKind,
    pub channel_id: String,
    pub source_node_id: Option<String>,
    pub transaction_id: Option<String>,
    /// Column name to value for the captured row.
    pub row_data: JsonValue,
    pub create_time: DateTime<Utc>,
}

impl ChangeRecord {
    /// Creates an unsaved record; the store assigns `data_id` on capture.
    pub fn new(
        trigger_id: impl Into<String>,
        table_name: impl Into<String>,
        event_kind: EventKind,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            data_id: 0,
            trigger_id: trigger_id.into(),
            table_name: table_name.into(),
            event_kind,
            channel_id: channel_id.into(),
            source_node_id: None,
            transaction_id: None,
            row_data: JsonValue::Object(Default::default()),
            create_time: Utc::now(),
        }
    }

    pub fn with_source_node(mut self, node_id: impl Into<String>) -> Self {
        self.source_node_id = Some(node_id.into());
        self
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_row_data(mut self, row_data: JsonValue) -> Self {
        self.row_data = row_data;
        self
    }

    /// Returns a column value rendered as text, `None` when the column is absent or null.
    pub fn column_text(&self, column: &str) -> Option<String> {
        let object = self.row_data.as_object()?;
        let value = object
            .get(column)
            .or_else(|| {
                object
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(column))
                    .map(|(_, value)| value)
            })?;
        match value {
            JsonValue::Null => None,
            JsonValue::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// A named lane of change records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub channel_id: String,
    pub enabled: bool,
    pub suspended: bool,
    /// Records on an ignored channel are never offered to a router.
    pub ignored: bool,
    /// Maximum records consumed by one pass; 0 disables the limit.
    pub max_data_to_route: u64,
    pub max_batch_size: usize,
    pub batch_algorithm: String,
}

impl ChannelDescriptor {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            enabled: true,
            suspended: false,
            ignored: false,
            max_data_to_route: 100_000,
            max_batch_size: 1_000,
            batch_algorithm: "default".to_string(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn suspended(mut self, suspended: bool) -> Self {
        self.suspended = suspended;
        self
    }

    pub fn ignored(mut self, ignored: bool) -> Self {
        self.ignored = ignored;
        self
    }

    pub fn max_data_to_route(mut self, max: u64) -> Self {
        self.max_data_to_route = max;
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn batch_algorithm(mut self, name: impl Into<String>) -> Self {
        self.batch_algorithm = name.into();
        self
    }

    /// True when the coordinator should route this channel.
    pub fn is_routable(&self) -> bool {
        self.enabled && !self.suspended
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub node_group_id: String,
    pub external_id: String,
    pub sync_enabled: bool,
    pub created_at_node_id: Option<String>,
}

impl Node {
    pub fn new(node_id: impl Into<String>, node_group_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self {
            external_id: node_id.clone(),
            node_id,
            node_group_id: node_group_id.into(),
            sync_enabled: true,
            created_at_node_id: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = external_id.into();
        self
    }

    pub fn with_sync_enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    pub fn created_at(mut self, node_id: impl Into<String>) -> Self {
        self.created_at_node_id = Some(node_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeGroupLink {
    pub source_node_group_id: String,
    pub target_node_group_id: String,
}

impl NodeGroupLink {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_node_group_id: source.into(),
            target_node_group_id: target.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSecurity {
    pub node_id: String,
    pub initial_load_enabled: bool,
    pub registration_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterDefinition {
    pub router_id: String,
    /// Name of the registered router; blank selects the default router.
    pub router_type: Option<String>,
    pub router_expression: Option<String>,
    pub source_node_group_id: String,
    pub target_node_group_id: String,
    pub sync_on_insert: bool,
    pub sync_on_update: bool,
    pub sync_on_delete: bool,
}

impl RouterDefinition {
    pub fn new(
        router_id: impl Into<String>,
        source_node_group_id: impl Into<String>,
        target_node_group_id: impl Into<String>,
    ) -> Self {
        Self {
            router_id: router_id.into(),
            router_type: None,
            router_expression: None,
            source_node_group_id: source_node_group_id.into(),
            target_node_group_id: target_node_group_id.into(),
            sync_on_insert: true,
            sync_on_update: true,
            sync_on_delete: true,
        }
    }

    pub fn with_type(mut self, router_type: impl Into<String>) -> Self {
        self.router_type = Some(router_type.into());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.router_expression = Some(expression.into());
        self
    }

    pub fn sync_on(mut self, insert: bool, update: bool, delete: bool) -> Self {
        self.sync_on_insert = insert;
        self.sync_on_update = update;
        self.sync_on_delete = delete;
        self
    }
}

/// Binds a capture trigger to a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRouter {
    pub trigger_id: String,
    pub router: RouterDefinition,
    /// Lets a change flow back to the node it came from.
    pub ping_back_enabled: bool,
}

impl TriggerRouter {
    pub fn new(trigger_id: impl Into<String>, router: RouterDefinition) -> Self {
        Self {
            trigger_id: trigger_id.into(),
            router,
            ping_back_enabled: false,
        }
    }

    pub fn with_ping_back(mut self, enabled: bool) -> Self {
        self.ping_back_enabled = enabled;
        self
    }

    pub fn is_routed(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Insert => self.router.sync_on_insert,
            EventKind::Update => self.router.sync_on_update,
            EventKind::Delete => self.router.sync_on_delete,
            EventKind::Reload => true,
        }
    }

    /// Cache key for per-pass lookups.
    pub fn key(&self) -> (String, String) {
        (self.trigger_id.clone(), self.router.router_id.clone())
    }
}

/// Routing-event row linking a change record to the batch that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataEvent {
    pub data_id: DataId,
    pub batch_id: BatchId,
    pub router_id: String,
}

impl DataEvent {
    pub fn new(data_id: DataId, batch_id: BatchId, router_id: impl Into<String>) -> Self {
        Self {
            data_id,
            batch_id,
            router_id: router_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_kind_codes_round_trip() {
        for kind in [
            EventKind::Insert,
            EventKind::Update,
            EventKind::Delete,
            EventKind::Reload,
        ] {
            assert_eq!(EventKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(EventKind::from_code("X"), None);
    }

    #[test]
    fn column_text_renders_scalars_and_ignores_null() {
        let record = ChangeRecord::new("orders", "orders", EventKind::Insert, "sales").with_row_data(
            json!({"STORE_ID": "s-1", "qty": 3, "note": null}),
        );

        assert_eq!(record.column_text("STORE_ID").as_deref(), Some("s-1"));
        assert_eq!(record.column_text("store_id").as_deref(), Some("s-1"));
        assert_eq!(record.column_text("qty").as_deref(), Some("3"));
        assert_eq!(record.column_text("note"), None);
        assert_eq!(record.column_text("missing"), None);
    }

    #[test]
    fn trigger_router_honors_sync_flags() {
        let router = RouterDefinition::new("r1", "corp", "store").sync_on(true, false, true);
        let binding = TriggerRouter::new("orders", router);

        assert!(binding.is_routed(EventKind::Insert));
        assert!(!binding.is_routed(EventKind::Update));
        assert!(binding.is_routed(EventKind::Delete));
        assert!(binding.is_routed(EventKind::Reload));
    }
}
