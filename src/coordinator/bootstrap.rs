use super::RoutingCoordinator;
use crate::core::Result;
use std::time::Instant;
use tracing::{Level, event};

impl RoutingCoordinator {
    /// Queues reloads for registered nodes that asked for an initial load. Never fails.
    pub(super) async fn insert_initial_load_events(&self) {
        if let Err(err) = self.queue_initial_loads().await {
            event!(Level::ERROR, error = %err, "failed to queue initial load events");
        }
    }

    async fn queue_initial_loads(&self) -> Result<()> {
        let Some(identity) = self.topology.find_identity().await? else {
            return Ok(());
        };

        for security in self.topology.find_all_node_security().await? {
            let created_here =
                identity.created_at_node_id.as_deref() == Some(security.node_id.as_str());
            if !security.initial_load_enabled
                || (security.registration_time.is_none() && !created_here)
            {
                continue;
            }

            let Some(node) = self.topology.find_node(&security.node_id).await? else {
                event!(
                    Level::WARN,
                    node_id = %security.node_id,
                    "initial load requested for unknown node"
                );
                continue;
            };

            let started = Instant::now();
            self.store.insert_reload_events(&node).await?;
            let elapsed = started.elapsed();
            let elapsed_ms = elapsed.as_millis() as u64;
            if elapsed > self.config.long_operation_threshold_duration() {
                event!(Level::WARN, node_id = %node.node_id, elapsed_ms, "queued initial load");
            } else {
                event!(Level::INFO, node_id = %node.node_id, elapsed_ms, "queued initial load");
            }
        }
        Ok(())
    }
}
