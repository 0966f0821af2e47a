use super::{DataMetaData, DataRouter};
use crate::context::RoutingContext;
use crate::core::Node;
use std::collections::BTreeSet;

/// Sends every change to every candidate node.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDataRouter;

impl DataRouter for DefaultDataRouter {
    fn route_to_nodes(
        &self,
        _context: &RoutingContext,
        _data: &DataMetaData<'_>,
        nodes: &[Node],
        _initial_load: bool,
    ) -> BTreeSet<String> {
        nodes.iter().map(|node| node.node_id.clone()).collect()
    }
}
