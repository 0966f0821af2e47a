use crate::core::{ChannelDescriptor, Node, NodeGroupLink, NodeSecurity, Result, TriggerRouter};
use async_trait::async_trait;
use std::collections::HashMap;

/// Trigger id to the ordered router bindings for that trigger.
pub type TriggerRouterMap = HashMap<String, Vec<TriggerRouter>>;

/// Read-only view of nodes, groups, channels and routing configuration.
#[async_trait]
pub trait Topology: Send + Sync {
    /// The node this process runs as, if it has been configured.
    async fn find_identity(&self) -> Result<Option<Node>>;

    async fn find_node(&self, node_id: &str) -> Result<Option<Node>>;

    /// Channels in routing order.
    async fn list_enabled_channels(&self) -> Result<Vec<ChannelDescriptor>>;

    /// Returns the link from `source_group` to `target_group`, if one is configured.
    async fn resolve_group_link(
        &self,
        source_group: &str,
        target_group: &str,
    ) -> Result<Option<NodeGroupLink>>;

    /// Nodes of `group_id` that currently accept changes.
    async fn list_enabled_nodes_in_group(&self, group_id: &str) -> Result<Vec<Node>>;

    /// Router bindings for the local node. `relay` selects bindings that apply when the
    /// local node forwards changes it received from elsewhere.
    async fn trigger_routers_for_current_node(&self, relay: bool) -> Result<TriggerRouterMap>;

    async fn find_all_node_security(&self) -> Result<Vec<NodeSecurity>>;
}
