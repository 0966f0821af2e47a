use crate::core::{ChannelDescriptor, Node, NodeGroupLink, NodeSecurity, Result, TriggerRouter};
use crate::services::{Topology, TriggerRouterMap};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};

#[derive(Default)]
struct TopologyState {
    identity: Option<Node>,
    nodes: BTreeMap<String, Node>,
    channels: Vec<ChannelDescriptor>,
    links: Vec<NodeGroupLink>,
    trigger_routers: Vec<TriggerRouter>,
    relay_trigger_routers: Vec<TriggerRouter>,
    node_security: Vec<NodeSecurity>,
}

fn group_by_trigger(bindings: &[TriggerRouter]) -> TriggerRouterMap {
    let mut map = TriggerRouterMap::new();
    for binding in bindings {
        map.entry(binding.trigger_id.clone())
            .or_default()
            .push(binding.clone());
    }
    map
}

/// A `Topology` held in memory and edited through setters.
///
/// Bindings added with `add_trigger_router` apply when their router's source group is the
/// identity's group. Relay bindings are returned as is.
#[derive(Default)]
pub struct MemoryTopology {
    state: RwLock<TopologyState>,
    trigger_router_lookups: AtomicUsize,
}

impl MemoryTopology {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, TopologyState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the local node. The node is also registered like `add_node`.
    pub fn set_identity(&self, node: Node) {
        let mut state = self.write();
        state.nodes.insert(node.node_id.clone(), node.clone());
        state.identity = Some(node);
    }

    pub fn add_node(&self, node: Node) {
        self.write().nodes.insert(node.node_id.clone(), node);
    }

    /// Adds a channel, or replaces the channel with the same id in place.
    pub fn set_channel(&self, channel: ChannelDescriptor) {
        let mut state = self.write();
        match state
            .channels
            .iter_mut()
            .find(|existing| existing.channel_id == channel.channel_id)
        {
            Some(existing) => *existing = channel,
            None => state.channels.push(channel),
        }
    }

    pub fn add_group_link(&self, link: NodeGroupLink) {
        self.write().links.push(link);
    }

    pub fn add_trigger_router(&self, binding: TriggerRouter) {
        self.write().trigger_routers.push(binding);
    }

    pub fn add_relay_trigger_router(&self, binding: TriggerRouter) {
        self.write().relay_trigger_routers.push(binding);
    }

    pub fn add_node_security(&self, security: NodeSecurity) {
        self.write().node_security.push(security);
    }

    /// Number of `trigger_routers_for_current_node` calls so far.
    pub fn trigger_router_lookups(&self) -> usize {
        self.trigger_router_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Topology for MemoryTopology {
    async fn find_identity(&self) -> Result<Option<Node>> {
        Ok(self.state.read()?.identity.clone())
    }

    async fn find_node(&self, node_id: &str) -> Result<Option<Node>> {
        Ok(self.state.read()?.nodes.get(node_id).cloned())
    }

    async fn list_enabled_channels(&self) -> Result<Vec<ChannelDescriptor>> {
        let state = self.state.read()?;
        Ok(state
            .channels
            .iter()
            .filter(|channel| channel.enabled)
            .cloned()
            .collect())
    }

    async fn resolve_group_link(
        &self,
        source_group: &str,
        target_group: &str,
    ) -> Result<Option<NodeGroupLink>> {
        let state = self.state.read()?;
        Ok(state
            .links
            .iter()
            .find(|link| {
                link.source_node_group_id == source_group
                    && link.target_node_group_id == target_group
            })
            .cloned())
    }

    async fn list_enabled_nodes_in_group(&self, group_id: &str) -> Result<Vec<Node>> {
        let state = self.state.read()?;
        Ok(state
            .nodes
            .values()
            .filter(|node| node.node_group_id == group_id && node.sync_enabled)
            .cloned()
            .collect())
    }

    async fn trigger_routers_for_current_node(&self, relay: bool) -> Result<TriggerRouterMap> {
        self.trigger_router_lookups.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read()?;
        if relay {
            return Ok(group_by_trigger(&state.relay_trigger_routers));
        }

        let Some(identity) = state.identity.as_ref() else {
            return Ok(TriggerRouterMap::new());
        };
        let local: Vec<TriggerRouter> = state
            .trigger_routers
            .iter()
            .filter(|binding| binding.router.source_node_group_id == identity.node_group_id)
            .cloned()
            .collect();
        Ok(group_by_trigger(&local))
    }

    async fn find_all_node_security(&self) -> Result<Vec<NodeSecurity>> {
        Ok(self.state.read()?.node_security.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RouterDefinition;

    #[tokio::test]
    async fn test_bindings_follow_identity_group() {
        let topology = MemoryTopology::new();
        topology.set_identity(Node::new("corp", "corp"));
        topology.add_trigger_router(TriggerRouter::new(
            "orders",
            RouterDefinition::new("corp_to_store", "corp", "store"),
        ));
        topology.add_trigger_router(TriggerRouter::new(
            "orders",
            RouterDefinition::new("store_to_corp", "store", "corp"),
        ));

        let map = topology.trigger_routers_for_current_node(false).await.unwrap();
        assert_eq!(map["orders"].len(), 1);
        assert_eq!(map["orders"][0].router.router_id, "corp_to_store");
        assert!(topology.trigger_routers_for_current_node(true).await.unwrap().is_empty());
        assert_eq!(topology.trigger_router_lookups(), 2);
    }

    #[tokio::test]
    async fn test_disabled_nodes_and_channels_are_hidden() {
        let topology = MemoryTopology::new();
        topology.add_node(Node::new("s1", "store"));
        topology.add_node(Node::new("s2", "store").with_sync_enabled(false));
        topology.set_channel(ChannelDescriptor::new("sales"));
        topology.set_channel(ChannelDescriptor::new("config"));
        topology.set_channel(ChannelDescriptor::new("sales").enabled(false));

        let nodes = topology.list_enabled_nodes_in_group("store").await.unwrap();
        assert_eq!(nodes.len(), 1);
        let channels = topology.list_enabled_channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].channel_id, "config");
    }
}
