use super::RoutingCoordinator;
use crate::context::RoutingContext;
use crate::core::{BatchStatus, Result};
use chrono::Utc;
use tracing::{Level, event};

impl RoutingCoordinator {
    /// Closes every open batch and commits them together with their data events.
    ///
    /// Buffered data events are written first. Any error leaves the transaction uncommitted
    /// for the caller to roll back.
    pub(super) async fn complete_batches_and_commit(
        &self,
        context: &mut RoutingContext,
    ) -> Result<()> {
        self.flush_data_events(context).await?;

        let routers = context.used_routers();
        let now = Utc::now();
        for mut batch in context.take_batches() {
            batch.record_router_millis(now);
            for router in &routers {
                router.complete_batch(context, &mut batch);
            }
            if !batch.is_unrouted() {
                batch.status = BatchStatus::New;
            }
            context
                .transaction()
                .await?
                .update_outgoing_batch(&batch)
                .await?;
            context.stats_mut().batches_completed += 1;
            event!(
                Level::DEBUG,
                batch_id = batch.batch_id,
                node_id = %batch.node_id,
                data_event_count = batch.data_event_count,
                status = %batch.status,
                "completed outgoing batch"
            );
        }

        context.commit().await?;
        context.set_needs_committed(false);
        Ok(())
    }

    /// Writes buffered data events through the open transaction. Duplicates are skipped.
    pub(super) async fn flush_data_events(&self, context: &mut RoutingContext) -> Result<()> {
        let data_events = context.take_data_events();
        if data_events.is_empty() {
            return Ok(());
        }

        let written = context
            .transaction()
            .await?
            .insert_data_events(&data_events)
            .await?;
        if written < data_events.len() {
            event!(
                Level::WARN,
                channel_id = %context.channel().channel_id,
                data_events = data_events.len(),
                skipped = data_events.len() - written,
                "some data events were already routed"
            );
        }
        context.stats_mut().data_events_inserted += written as u64;
        Ok(())
    }
}
