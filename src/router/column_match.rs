use super::{DataMetaData, DataRouter};
use crate::context::RoutingContext;
use crate::core::Node;
use lru::LruCache;
use regex::Regex;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::{Level, event};

lazy_static::lazy_static! {
    static ref CONDITION_PATTERN: Regex =
        Regex::new(r"^\s*([^=!\s]+)\s*(!=|=)\s*(.*?)\s*$").expect("valid condition pattern");
    static ref CONDITION_SEPARATOR: Regex =
        Regex::new(r"(?i)\r?\n|\s+or\s+").expect("valid separator pattern");
    static ref PARSED_EXPRESSIONS: Mutex<LruCache<String, Arc<Option<Vec<Condition>>>>> =
        Mutex::new(LruCache::new(
            NonZeroUsize::new(256).unwrap_or(NonZeroUsize::MIN)
        ));
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    NodeId,
    ExternalId,
    Null,
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Condition {
    column: String,
    negated: bool,
    operand: Operand,
}

impl Condition {
    fn parse(text: &str) -> Option<Self> {
        let captures = CONDITION_PATTERN.captures(text)?;
        let column = captures.get(1)?.as_str().to_string();
        let negated = captures.get(2)?.as_str() == "!=";
        let raw = captures.get(3)?.as_str();
        if raw.is_empty() {
            return None;
        }

        let operand = match raw {
            ":NODE_ID" => Operand::NodeId,
            ":EXTERNAL_ID" => Operand::ExternalId,
            _ if raw.eq_ignore_ascii_case("null") => Operand::Null,
            _ => Operand::Literal(raw.trim_matches('\'').to_string()),
        };

        Some(Self {
            column,
            negated,
            operand,
        })
    }

    fn select(&self, value: Option<&str>, nodes: &[Node], selected: &mut BTreeSet<String>) {
        let holds = |target: Option<&str>| (value == target) != self.negated;
        match &self.operand {
            Operand::NodeId => selected.extend(
                nodes
                    .iter()
                    .filter(|node| holds(Some(node.node_id.as_str())))
                    .map(|node| node.node_id.clone()),
            ),
            Operand::ExternalId => selected.extend(
                nodes
                    .iter()
                    .filter(|node| holds(Some(node.external_id.as_str())))
                    .map(|node| node.node_id.clone()),
            ),
            Operand::Null => {
                if holds(None) {
                    selected.extend(nodes.iter().map(|node| node.node_id.clone()));
                }
            }
            Operand::Literal(literal) => {
                if holds(Some(literal.as_str())) {
                    selected.extend(nodes.iter().map(|node| node.node_id.clone()));
                }
            }
        }
    }
}

/// Parses one condition per line (or per ` or `). `None` when any part is malformed.
fn parse_expression(expression: &str) -> Option<Vec<Condition>> {
    CONDITION_SEPARATOR
        .split(expression)
        .filter(|part| !part.trim().is_empty())
        .map(Condition::parse)
        .collect::<Option<Vec<_>>>()
        .filter(|conditions| !conditions.is_empty())
}

fn cached_expression(expression: &str) -> Arc<Option<Vec<Condition>>> {
    if let Ok(mut cache) = PARSED_EXPRESSIONS.lock() {
        if let Some(parsed) = cache.get(expression) {
            return parsed.clone();
        }
        let parsed = Arc::new(parse_expression(expression));
        cache.put(expression.to_string(), parsed.clone());
        return parsed;
    }
    Arc::new(parse_expression(expression))
}

/// Routes on column values of the captured row.
///
/// The router expression holds conditions such as `STORE_ID=:NODE_ID`,
/// `REGION=:EXTERNAL_ID`, `STATUS!=CLOSED` or `PARENT_ID=NULL`, one per line or joined
/// with ` or `. A node receives the change when any condition selects it. Conditions
/// against a literal select every candidate node when they hold.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnMatchDataRouter;

impl DataRouter for ColumnMatchDataRouter {
    fn route_to_nodes(
        &self,
        _context: &RoutingContext,
        data: &DataMetaData<'_>,
        nodes: &[Node],
        _initial_load: bool,
    ) -> BTreeSet<String> {
        let router = &data.trigger_router.router;
        let Some(expression) = router
            .router_expression
            .as_deref()
            .filter(|expression| !expression.trim().is_empty())
        else {
            event!(
                Level::WARN,
                router_id = %router.router_id,
                "column router has no expression, routing to no nodes"
            );
            return BTreeSet::new();
        };

        let parsed = cached_expression(expression);
        let Some(conditions) = parsed.as_ref() else {
            event!(
                Level::WARN,
                router_id = %router.router_id,
                expression,
                "column router expression is not valid, routing to no nodes"
            );
            return BTreeSet::new();
        };

        let mut selected = BTreeSet::new();
        for condition in conditions {
            let value = data.data.column_text(&condition.column);
            condition.select(value.as_deref(), nodes, &mut selected);
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChangeRecord, ChannelDescriptor, EventKind, RouterDefinition, TriggerRouter};
    use crate::memory::MemoryDataStore;
    use serde_json::json;

    fn nodes() -> Vec<Node> {
        vec![
            Node::new("s1", "store").with_external_id("east"),
            Node::new("s2", "store").with_external_id("west"),
            Node::new("s3", "store").with_external_id("east"),
        ]
    }

    fn route(expression: &str, row: serde_json::Value) -> BTreeSet<String> {
        let channel = ChannelDescriptor::new("sales");
        let context = RoutingContext::new("corp", channel.clone(), Arc::new(MemoryDataStore::new()));
        let binding = TriggerRouter::new(
            "orders",
            RouterDefinition::new("corp_to_store", "corp", "store")
                .with_type("column")
                .with_expression(expression),
        );
        let data = ChangeRecord::new("orders", "orders", EventKind::Insert, "sales").with_row_data(row);
        let meta = DataMetaData::new(&data, &binding, &channel);
        ColumnMatchDataRouter.route_to_nodes(&context, &meta, &nodes(), false)
    }

    fn ids(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_node_id_token() {
        assert_eq!(route("STORE_ID=:NODE_ID", json!({"STORE_ID": "s2"})), ids(&["s2"]));
        assert_eq!(route("STORE_ID=:NODE_ID", json!({"STORE_ID": "s9"})), ids(&[]));
        assert_eq!(
            route("STORE_ID!=:NODE_ID", json!({"STORE_ID": "s2"})),
            ids(&["s1", "s3"])
        );
    }

    #[test]
    fn test_external_id_token() {
        assert_eq!(
            route("REGION=:EXTERNAL_ID", json!({"REGION": "east"})),
            ids(&["s1", "s3"])
        );
    }

    #[test]
    fn test_literal_and_null_conditions() {
        assert_eq!(
            route("STATUS=OPEN", json!({"STATUS": "OPEN"})),
            ids(&["s1", "s2", "s3"])
        );
        assert_eq!(route("STATUS=OPEN", json!({"STATUS": "CLOSED"})), ids(&[]));
        assert_eq!(route("STATUS!='CLOSED'", json!({"STATUS": "OPEN"})).len(), 3);
        assert_eq!(route("PARENT_ID=NULL", json!({"PARENT_ID": null})).len(), 3);
        assert_eq!(route("PARENT_ID=null", json!({"PARENT_ID": 4})), ids(&[]));
    }

    #[test]
    fn test_conditions_are_or_ed() {
        assert_eq!(
            route("STORE_ID=:NODE_ID or REGION=:EXTERNAL_ID", json!({"STORE_ID": "s2", "REGION": "east"})),
            ids(&["s1", "s2", "s3"])
        );
        assert_eq!(
            route("STORE_ID=:NODE_ID\nQTY=3", json!({"STORE_ID": "s1", "QTY": 2})),
            ids(&["s1"])
        );
    }

    #[test]
    fn test_invalid_expression_routes_nowhere() {
        assert!(route("STORE_ID", json!({"STORE_ID": "s1"})).is_empty());
        assert!(route("STORE_ID=", json!({"STORE_ID": "s1"})).is_empty());
        assert!(route("   ", json!({"STORE_ID": "s1"})).is_empty());
    }
}
