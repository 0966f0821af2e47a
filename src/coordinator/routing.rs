use super::RoutingCoordinator;
use crate::batching::BatchAlgorithm;
use crate::context::RoutingContext;
use crate::core::{
    ChangeRecord, DataEvent, Node, OutgoingBatch, Result, RoutingError, TriggerRouter,
    UNROUTED_NODE_ID,
};
use crate::router::DataMetaData;
use crate::services::TriggerRouterMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Level, event};

impl RoutingCoordinator {
    /// Routes one change record through every binding of its trigger.
    pub(super) async fn route_data(
        &self,
        context: &mut RoutingContext,
        data: &ChangeRecord,
        batch_algorithm: &dyn BatchAlgorithm,
    ) -> Result<()> {
        let trigger_routers = self.trigger_routers_for_data(context, data).await?;
        if trigger_routers.is_empty() {
            event!(
                Level::WARN,
                data_id = data.data_id,
                trigger_id = %data.trigger_id,
                "no trigger router is configured for change record, skipping it"
            );
            return Ok(());
        }

        let channel = context.channel().clone();
        for trigger_router in &trigger_routers {
            let meta = DataMetaData::new(data, trigger_router, &channel);
            let mut node_ids = BTreeSet::new();

            if !channel.ignored && trigger_router.is_routed(data.event_kind) {
                let (name, router) = match self.routers.resolve(trigger_router) {
                    Ok(resolved) => resolved,
                    Err(err) => {
                        event!(
                            Level::ERROR,
                            router_id = %trigger_router.router.router_id,
                            error = %err,
                            "cannot resolve router, skipping binding"
                        );
                        continue;
                    }
                };
                context.add_used_router(&name, router.clone());

                let nodes = self.find_available_nodes(context, trigger_router).await?;
                let started = Instant::now();
                node_ids = router.route_to_nodes(context, &meta, &nodes, false);
                context.stats_mut().data_router_ms += started.elapsed().as_millis() as u64;

                if !trigger_router.ping_back_enabled {
                    if let Some(source_node_id) = data.source_node_id.as_deref() {
                        node_ids.remove(source_node_id);
                    }
                }
            }

            if node_ids.is_empty() {
                node_ids.insert(UNROUTED_NODE_ID.to_string());
            }
            self.insert_data_events(context, &meta, &node_ids, batch_algorithm)
                .await?;
        }
        Ok(())
    }

    /// Adds the record to the open batch of every node in `node_ids`, creating batches on
    /// first use, and runs the completion check once per data event. Buffered events are
    /// counted as inserted when they are flushed.
    pub(super) async fn insert_data_events(
        &self,
        context: &mut RoutingContext,
        data: &DataMetaData<'_>,
        node_ids: &BTreeSet<String>,
        batch_algorithm: &dyn BatchAlgorithm,
    ) -> Result<()> {
        let started = Instant::now();
        let record = data.data;
        let router_id = data.trigger_router.router.router_id.as_str();
        let mut inserted = 0;

        for node_id in node_ids {
            if context.batch(node_id).is_none() {
                let mut batch = OutgoingBatch::open_for(node_id.as_str(), record.channel_id.as_str());
                context
                    .transaction()
                    .await?
                    .insert_outgoing_batch(&mut batch)
                    .await?;
                context.put_batch(batch);
            }

            let batch_id = match context.batch_mut(node_id) {
                Some(batch) => {
                    batch.increment_event_count(record.event_kind);
                    batch.increment_data_event_count();
                    batch.batch_id
                }
                None => {
                    return Err(RoutingError::ExecutionError(format!(
                        "no open batch for node '{}'",
                        node_id
                    )));
                }
            };

            let data_event = DataEvent::new(record.data_id, batch_id, router_id);
            if self.store.supports_bulk_insert() {
                context.add_data_event(data_event);
                if context.buffered_data_event_count() >= self.config.flush_event_batch_size {
                    self.flush_data_events(context).await?;
                }
            } else {
                match context.transaction().await?.insert_data_event(&data_event).await {
                    Ok(()) => inserted += 1,
                    Err(err) if err.is_data_integrity() => {
                        event!(
                            Level::WARN,
                            data_id = record.data_id,
                            batch_id,
                            node_id = %node_id,
                            error = %err,
                            "change record was already routed to this batch"
                        );
                    }
                    Err(err) => return Err(err),
                }
            }

            if let Some(batch) = context.batch(node_id) {
                if batch_algorithm.is_batch_complete(batch, data, context) {
                    context.set_needs_committed(true);
                }
            }
        }

        let stats = context.stats_mut();
        stats.data_events_inserted += inserted;
        stats.insert_data_events_ms += started.elapsed().as_millis() as u64;
        Ok(())
    }

    /// Enabled members of the binding's target group, or nothing when the source group has
    /// no link to it. Cached per binding for the pass.
    pub(super) async fn find_available_nodes(
        &self,
        context: &mut RoutingContext,
        trigger_router: &TriggerRouter,
    ) -> Result<Arc<Vec<Node>>> {
        let key = trigger_router.key();
        if let Some(nodes) = context.available_nodes(&key) {
            return Ok(nodes);
        }

        let router = &trigger_router.router;
        let link = self
            .topology
            .resolve_group_link(&router.source_node_group_id, &router.target_node_group_id)
            .await?;
        let nodes = match link {
            Some(_) => {
                self.topology
                    .list_enabled_nodes_in_group(&router.target_node_group_id)
                    .await?
            }
            None => {
                event!(
                    Level::ERROR,
                    router_id = %router.router_id,
                    source_group = %router.source_node_group_id,
                    target_group = %router.target_node_group_id,
                    "router refers to a node group link that does not exist"
                );
                Vec::new()
            }
        };

        let nodes = Arc::new(nodes);
        context.set_available_nodes(key, nodes.clone());
        Ok(nodes)
    }

    /// Bindings for the record's trigger, falling back to relay bindings.
    async fn trigger_routers_for_data(
        &self,
        context: &mut RoutingContext,
        data: &ChangeRecord,
    ) -> Result<Vec<TriggerRouter>> {
        for relay in [false, true] {
            let routers = self.trigger_router_map(context, relay).await?;
            if let Some(bindings) = routers.get(&data.trigger_id).filter(|b| !b.is_empty()) {
                return Ok(bindings.clone());
            }
        }
        Ok(Vec::new())
    }

    async fn trigger_router_map(
        &self,
        context: &mut RoutingContext,
        relay: bool,
    ) -> Result<Arc<TriggerRouterMap>> {
        if let Some(routers) = context.trigger_routers(relay) {
            return Ok(routers);
        }
        let routers = Arc::new(self.topology.trigger_routers_for_current_node(relay).await?);
        context.set_trigger_routers(relay, routers.clone());
        Ok(routers)
    }

    /// Whether any of `nodes` would receive the record. Writes nothing.
    pub fn should_data_be_routed(
        &self,
        context: &RoutingContext,
        data: &DataMetaData<'_>,
        nodes: &[Node],
        initial_load: bool,
    ) -> Result<bool> {
        let (_, router) = self.routers.resolve(data.trigger_router)?;
        let node_ids = router.route_to_nodes(context, data, nodes, initial_load);
        Ok(nodes.iter().any(|node| node_ids.contains(&node.node_id)))
    }
}
