//! Routing passes.
//!
//! A [`RoutingCoordinator`] takes the cluster routing lock, queues initial loads, routes every
//! enabled channel in turn and releases the lock again. Each channel pass streams pending
//! change records through the read pipeline, routes each one to its target nodes and commits
//! the resulting batches together.

mod bootstrap;
mod commit;
mod routing;

use crate::batching::{BatchAlgorithm, BatchAlgorithmRegistry};
use crate::config::RoutingConfig;
use crate::context::RoutingContext;
use crate::core::{ChannelDescriptor, Node, Result};
use crate::pipeline::{ChangeRecordReader, ReadService, change_record_channel};
use crate::router::{DataRouter, RouterRegistry};
use crate::services::{ClusterLock, DataStore, GapDetector, NoopGapDetector, StatisticSink, Topology};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

/// Outcome of one `run_routing_pass` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingPassSummary {
    /// False when another runner held the routing lock and nothing was done.
    pub lock_acquired: bool,
    pub data_routed: usize,
    pub channels_routed: usize,
}

/// Counters pushed to the statistic sink in chunks.
#[derive(Debug, Default)]
struct PendingStats {
    data_routed: u64,
    /// Data events of the context already pushed to the sink.
    data_events_reported: u64,
}

impl PendingStats {
    fn record_routed(&mut self) {
        self.data_routed += 1;
    }

    fn flush(&mut self, statistics: &dyn StatisticSink, context: &RoutingContext) {
        let channel_id = context.channel().channel_id.as_str();
        if self.data_routed > 0 {
            statistics.increment_data_routed(channel_id, self.data_routed);
            self.data_routed = 0;
        }
        let data_events_inserted = context.stats().data_events_inserted;
        let unreported = data_events_inserted.saturating_sub(self.data_events_reported);
        if unreported > 0 {
            statistics.increment_data_event_inserted(channel_id, unreported);
            self.data_events_reported = data_events_inserted;
        }
    }
}

pub struct RoutingCoordinator {
    config: RoutingConfig,
    cluster_lock: Arc<dyn ClusterLock>,
    topology: Arc<dyn Topology>,
    store: Arc<dyn DataStore>,
    statistics: Arc<dyn StatisticSink>,
    gap_detector: Arc<dyn GapDetector>,
    routers: RouterRegistry,
    batch_algorithms: BatchAlgorithmRegistry,
    read_service: ReadService,
    /// Serializes passes within this process.
    pass_guard: Mutex<()>,
}

impl RoutingCoordinator {
    /// Creates a coordinator with the built-in routers and batch algorithms and no gap
    /// detection. Fails when `config` is invalid.
    pub fn new(
        config: RoutingConfig,
        cluster_lock: Arc<dyn ClusterLock>,
        topology: Arc<dyn Topology>,
        store: Arc<dyn DataStore>,
        statistics: Arc<dyn StatisticSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cluster_lock,
            topology,
            store,
            statistics,
            gap_detector: Arc::new(NoopGapDetector),
            routers: RouterRegistry::with_default_routers(),
            batch_algorithms: BatchAlgorithmRegistry::with_default_algorithms(),
            read_service: ReadService::new(),
            pass_guard: Mutex::new(()),
        })
    }

    pub fn with_gap_detector(mut self, gap_detector: Arc<dyn GapDetector>) -> Self {
        self.gap_detector = gap_detector;
        self
    }

    /// Registers a router under `name`, replacing any router with that name.
    pub fn with_router(mut self, name: impl Into<String>, router: Arc<dyn DataRouter>) -> Self {
        self.routers.register(name, router);
        self
    }

    /// Registers a batch algorithm under `name`, replacing any algorithm with that name.
    pub fn with_batch_algorithm(
        mut self,
        name: impl Into<String>,
        algorithm: Arc<dyn BatchAlgorithm>,
    ) -> Self {
        self.batch_algorithms.register(name, algorithm);
        self
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn routers(&self) -> &RouterRegistry {
        &self.routers
    }

    /// Routes all pending change records once, if this runner can take the routing lock.
    ///
    /// Never fails: channel failures are logged and the remaining channels still run. The lock
    /// is released on every path, including a panic, which is resumed afterwards.
    pub async fn run_routing_pass(&self) -> RoutingPassSummary {
        let span = info_span!("routing.pass", pass_id = %Uuid::new_v4());
        self.run_locked_pass().instrument(span).await
    }

    async fn run_locked_pass(&self) -> RoutingPassSummary {
        let _pass = self.pass_guard.lock().await;
        let lock_name = self.config.route_lock_name.as_str();

        match self.cluster_lock.lock(lock_name).await {
            Ok(true) => {}
            Ok(false) => {
                event!(
                    Level::DEBUG,
                    lock = lock_name,
                    "routing lock is held by another runner, skipping pass"
                );
                return RoutingPassSummary::default();
            }
            Err(err) => {
                event!(
                    Level::WARN,
                    lock = lock_name,
                    error = %err,
                    "could not acquire routing lock, skipping pass"
                );
                return RoutingPassSummary::default();
            }
        }

        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.route_locked()).catch_unwind().await;

        if let Err(err) = self.cluster_lock.unlock(lock_name).await {
            event!(Level::ERROR, lock = lock_name, error = %err, "failed to release routing lock");
        }

        let summary = match outcome {
            Ok(summary) => summary,
            Err(panic) => std::panic::resume_unwind(panic),
        };

        let elapsed = started.elapsed();
        if summary.data_routed > 0 || elapsed > self.config.long_operation_threshold_duration() {
            event!(
                Level::INFO,
                data_routed = summary.data_routed,
                channels_routed = summary.channels_routed,
                elapsed_ms = elapsed.as_millis() as u64,
                "routing pass finished"
            );
        }
        summary
    }

    async fn route_locked(&self) -> RoutingPassSummary {
        self.insert_initial_load_events().await;
        self.gap_detector.before_routing().await;
        let (data_routed, channels_routed) = self.route_data_for_each_channel().await;
        self.gap_detector.after_routing().await;
        RoutingPassSummary {
            lock_acquired: true,
            data_routed,
            channels_routed,
        }
    }

    async fn route_data_for_each_channel(&self) -> (usize, usize) {
        let source_node = match self.topology.find_identity().await {
            Ok(Some(node)) => node,
            Ok(None) => {
                event!(Level::WARN, "local node identity is not configured, nothing routed");
                return (0, 0);
            }
            Err(err) => {
                event!(Level::ERROR, error = %err, "failed to look up local node identity");
                return (0, 0);
            }
        };

        let channels = match self.topology.list_enabled_channels().await {
            Ok(channels) => channels,
            Err(err) => {
                event!(Level::ERROR, error = %err, "failed to list channels");
                return (0, 0);
            }
        };

        let mut data_routed = 0;
        let mut channels_routed = 0;
        for channel in channels.iter().filter(|channel| channel.is_routable()) {
            data_routed += self.route_channel(channel, &source_node).await;
            channels_routed += 1;
        }
        (data_routed, channels_routed)
    }

    /// Routes the pending change records of one channel and returns how many were consumed.
    ///
    /// A failure rolls back the uncommitted part of the pass, is logged and yields 0. Batches
    /// committed before the failure stay committed.
    pub async fn route_channel(&self, channel: &ChannelDescriptor, source_node: &Node) -> usize {
        let span = info_span!("routing.channel", channel_id = %channel.channel_id);
        self.route_channel_inner(channel, source_node)
            .instrument(span)
            .await
    }

    async fn route_channel_inner(&self, channel: &ChannelDescriptor, source_node: &Node) -> usize {
        let started = Instant::now();
        let mut context =
            RoutingContext::new(source_node.node_id.clone(), channel.clone(), self.store.clone());

        let mut stats = PendingStats::default();

        let data_count = match self.select_data_and_route(&mut context, &mut stats).await {
            Ok(data_count) => data_count,
            Err(err) => {
                context.rollback().await;
                event!(
                    Level::ERROR,
                    channel_id = %channel.channel_id,
                    error = %err,
                    "failed to route and batch data on channel"
                );
                0
            }
        };

        if let Err(err) = self.finish_channel(&mut context).await {
            context.rollback().await;
            event!(
                Level::ERROR,
                channel_id = %channel.channel_id,
                error = %err,
                "failed to complete routing on channel"
            );
        }
        stats.flush(self.statistics.as_ref(), &context);

        context.log_stats(data_count, started.elapsed());
        context.cleanup().await;
        data_count
    }

    async fn select_data_and_route(
        &self,
        context: &mut RoutingContext,
        stats: &mut PendingStats,
    ) -> Result<usize> {
        let channel = context.channel().clone();
        let batch_algorithm = self.batch_algorithms.resolve(&channel)?;

        let (producer, mut reader) = change_record_channel(
            self.store.clone(),
            channel.clone(),
            self.config.reader_queue_capacity,
        );
        self.read_service.execute(producer)?;

        let result = self
            .consume(context, &mut reader, batch_algorithm.as_ref(), stats)
            .await;
        reader.set_reading(false);
        result
    }

    async fn consume(
        &self,
        context: &mut RoutingContext,
        reader: &mut ChangeRecordReader,
        batch_algorithm: &dyn BatchAlgorithm,
        stats: &mut PendingStats,
    ) -> Result<usize> {
        let channel = context.channel().clone();
        let mut total = 0usize;

        while let Some(data) = reader.take().await? {
            context.set_last_data_id_processed(data.data_id);
            let next = reader.peek().await?;
            context.record_transaction_boundary(&data, next);
            total += 1;

            self.route_data(context, &data, batch_algorithm).await?;
            stats.record_routed();

            let max_reached =
                channel.max_data_to_route > 0 && total as u64 >= channel.max_data_to_route;
            if max_reached {
                context.set_needs_committed(true);
            }
            if context.needs_committed() {
                self.complete_batches_and_commit(context).await?;
            }
            if max_reached {
                event!(
                    Level::INFO,
                    channel_id = %channel.channel_id,
                    data_routed = total,
                    "routed the maximum number of records for this pass"
                );
                reader.set_reading(false);
                break;
            }

            if stats.data_routed >= self.config.stats_flush_size as u64 {
                stats.flush(self.statistics.as_ref(), context);
            }
        }
        Ok(total)
    }

    /// Commits what is still open and reports the remaining backlog.
    async fn finish_channel(&self, context: &mut RoutingContext) -> Result<()> {
        self.complete_batches_and_commit(context).await?;

        if context.last_data_id_processed() > 0 {
            let channel_id = context.channel().channel_id.clone();
            let started = Instant::now();
            let unrouted = self
                .store
                .count_unrouted(&channel_id, context.last_data_id_processed())
                .await?;
            let elapsed = started.elapsed();
            if elapsed > self.config.long_operation_threshold_duration() {
                event!(
                    Level::WARN,
                    channel_id = %channel_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "counting unrouted data took a long time"
                );
            }
            self.statistics.set_data_unrouted(&channel_id, unrouted);
        }
        Ok(())
    }

    /// Shuts down the background read worker. The next pass starts a new one.
    pub async fn stop(&self) -> Result<()> {
        self.read_service.stop().await
    }
}
