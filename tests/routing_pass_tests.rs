mod common;

use changeroute::memory::{MemoryClusterLock, MemoryDataStore, MemoryStatistics, MemoryTopology};
use changeroute::{
    BatchStatus, ChangeRecord, ChannelDescriptor, ClusterLock, EventKind, RouterDefinition,
    RoutingConfig, RoutingCoordinator, RoutingPassSummary, TriggerRouter, UNROUTED_NODE_ID,
};
use common::{Harness, STORE_A, STORE_B, nodes, order};
use std::sync::Arc;

#[tokio::test]
async fn routes_sales_channel_to_both_stores() {
    let h = Harness::new();
    let ids = h.capture_orders(3);

    let summary = h.coordinator().run_routing_pass().await;

    assert_eq!(
        summary,
        RoutingPassSummary {
            lock_acquired: true,
            data_routed: 3,
            channels_routed: 1,
        }
    );
    let destinations = h.destinations();
    for id in &ids {
        assert_eq!(destinations[id], nodes(&[STORE_A, STORE_B]));
    }

    let batches = h.store.outgoing_batches();
    assert_eq!(batches.len(), 2);
    for batch in &batches {
        assert_eq!(batch.status, BatchStatus::New);
        assert_eq!(batch.channel_id, "sales");
        assert_eq!(batch.data_event_count, 3);
        assert_eq!(batch.insert_event_count, 3);
    }

    assert!(h.store.unrouted_data_ids().is_empty());
    assert!(!h.lock.is_locked("ROUTE"));

    let stats = h.statistics.channel("sales");
    assert_eq!(stats.data_routed, 3);
    assert_eq!(stats.data_events_inserted, 6);
    assert_eq!(stats.data_unrouted, Some(0));
}

#[tokio::test]
async fn missing_group_link_routes_to_unrouted_batch() {
    let h = Harness::new();
    h.topology.add_trigger_router(TriggerRouter::new(
        "returns",
        RouterDefinition::new("corp_to_warehouse", "corp", "warehouse"),
    ));
    let id = h.capture(ChangeRecord::new("returns", "returns", EventKind::Insert, "sales"));

    h.coordinator().run_routing_pass().await;

    assert_eq!(h.destinations()[&id], nodes(&[UNROUTED_NODE_ID]));
    let batches = h.store.outgoing_batches();
    assert_eq!(batches.len(), 1);
    assert!(batches[0].is_unrouted());
    assert_eq!(batches[0].status, BatchStatus::Ok);
    assert!(h.store.unrouted_data_ids().is_empty());
}

#[tokio::test]
async fn max_data_to_route_defers_the_rest() {
    let h = Harness::new();
    h.topology
        .set_channel(ChannelDescriptor::new("sales").max_data_to_route(10));
    let ids = h.capture_orders(15);
    let coordinator = h.coordinator();

    let first = coordinator.run_routing_pass().await;

    assert_eq!(first.data_routed, 10);
    assert_eq!(h.store.unrouted_data_ids(), ids[10..].to_vec());
    assert_eq!(h.statistics.channel("sales").data_unrouted, Some(5));
    assert_eq!(h.destinations().len(), 10);

    let second = coordinator.run_routing_pass().await;

    assert_eq!(second.data_routed, 5);
    assert!(h.store.unrouted_data_ids().is_empty());
    assert_eq!(h.statistics.channel("sales").data_unrouted, Some(0));
    let destinations = h.destinations();
    assert_eq!(destinations.len(), 15);
    assert!(destinations.values().all(|to| *to == nodes(&[STORE_A, STORE_B])));
}

#[tokio::test]
async fn lock_held_elsewhere_is_a_no_op() {
    let h = Harness::new();
    h.capture_orders(3);
    let peer = h.lock.with_peer("server-2");
    assert!(peer.lock("ROUTE").await.unwrap());

    let summary = h.coordinator().run_routing_pass().await;

    assert_eq!(summary, RoutingPassSummary::default());
    assert!(!summary.lock_acquired);
    assert!(h.store.outgoing_batches().is_empty());
    assert_eq!(h.store.unrouted_data_ids().len(), 3);
    assert_eq!(h.lock.owner("ROUTE").as_deref(), Some("server-2"));
    assert_eq!(h.statistics.channel("sales").data_routed, 0);
}

#[tokio::test]
async fn custom_lock_name_is_used() {
    let h = Harness::new();
    h.capture_orders(1);
    let peer = h.lock.with_peer("server-2");
    assert!(peer.lock("ROUTE").await.unwrap());

    let summary = h
        .coordinator_with(RoutingConfig::default().route_lock_name("ROUTE_SALES"))
        .run_routing_pass()
        .await;

    assert!(summary.lock_acquired);
    assert_eq!(summary.data_routed, 1);
    assert!(!h.lock.is_locked("ROUTE_SALES"));
}

#[tokio::test]
async fn suspended_and_disabled_channels_are_skipped() {
    let h = Harness::new();
    h.topology
        .set_channel(ChannelDescriptor::new("audit").suspended(true));
    h.topology
        .set_channel(ChannelDescriptor::new("archive").enabled(false));
    let audit = h.capture(ChangeRecord::new("orders", "orders", EventKind::Insert, "audit"));
    let archive = h.capture(ChangeRecord::new("orders", "orders", EventKind::Insert, "archive"));
    let sales = h.capture_orders(1);

    let summary = h.coordinator().run_routing_pass().await;

    assert_eq!(summary.channels_routed, 1);
    assert_eq!(summary.data_routed, 1);
    assert_eq!(h.store.unrouted_data_ids(), vec![audit, archive]);
    assert!(h.destinations().contains_key(&sales[0]));
}

#[tokio::test]
async fn records_without_bindings_stay_pending() {
    let h = Harness::new();
    let orphan = h.capture(ChangeRecord::new("unknown", "unknown", EventKind::Insert, "sales"));
    let ids = h.capture_orders(2);
    let coordinator = h.coordinator();

    let summary = coordinator.run_routing_pass().await;

    assert_eq!(summary.data_routed, 3);
    assert_eq!(h.store.unrouted_data_ids(), vec![orphan]);
    assert_eq!(h.destinations().keys().copied().collect::<Vec<_>>(), ids);

    // Deferred, not lost: it is picked up again once a binding exists.
    h.topology.add_trigger_router(TriggerRouter::new(
        "unknown",
        RouterDefinition::new("corp_to_store_unknown", "corp", "store"),
    ));
    let summary = coordinator.run_routing_pass().await;
    assert_eq!(summary.data_routed, 1);
    assert_eq!(h.destinations()[&orphan], nodes(&[STORE_A, STORE_B]));
}

#[tokio::test]
async fn ignored_channel_routes_to_unrouted_batch() {
    let h = Harness::new();
    h.topology
        .set_channel(ChannelDescriptor::new("sales").ignored(true));
    let ids = h.capture_orders(2);

    h.coordinator().run_routing_pass().await;

    let destinations = h.destinations();
    for id in &ids {
        assert_eq!(destinations[id], nodes(&[UNROUTED_NODE_ID]));
    }
    assert!(h.store.unrouted_data_ids().is_empty());
}

#[tokio::test]
async fn event_kinds_not_synced_route_to_unrouted_batch() {
    let h = Harness::new();
    h.topology.add_trigger_router(TriggerRouter::new(
        "stock",
        RouterDefinition::new("corp_to_store_stock", "corp", "store").sync_on(true, true, false),
    ));
    let insert = h.capture(ChangeRecord::new("stock", "stock", EventKind::Insert, "sales"));
    let delete = h.capture(ChangeRecord::new("stock", "stock", EventKind::Delete, "sales"));

    h.coordinator().run_routing_pass().await;

    let destinations = h.destinations();
    assert_eq!(destinations[&insert], nodes(&[STORE_A, STORE_B]));
    assert_eq!(destinations[&delete], nodes(&[UNROUTED_NODE_ID]));
}

#[tokio::test]
async fn nothing_is_routed_without_identity() {
    let topology = Arc::new(MemoryTopology::new());
    topology.set_channel(ChannelDescriptor::new("sales"));
    let store = Arc::new(MemoryDataStore::new());
    store.append_data(order());
    let lock = MemoryClusterLock::new("server-1");

    let coordinator = RoutingCoordinator::new(
        RoutingConfig::default(),
        Arc::new(lock.clone()),
        topology,
        store.clone(),
        Arc::new(MemoryStatistics::new()),
    )
    .unwrap();
    let summary = coordinator.run_routing_pass().await;

    assert!(summary.lock_acquired);
    assert_eq!(summary.data_routed, 0);
    assert_eq!(summary.channels_routed, 0);
    assert_eq!(store.unrouted_data_ids().len(), 1);
    assert!(!lock.is_locked("ROUTE"));
}

#[tokio::test]
async fn passes_in_one_process_run_one_at_a_time() {
    let h = Harness::new();
    let ids = h.capture_orders(3);
    let coordinator = Arc::new(h.coordinator());

    let (first, second) = tokio::join!(
        coordinator.run_routing_pass(),
        coordinator.run_routing_pass()
    );

    assert!(first.lock_acquired);
    assert!(second.lock_acquired);
    assert_eq!(first.data_routed + second.data_routed, 3);
    let destinations = h.destinations();
    for id in &ids {
        assert_eq!(destinations[id], nodes(&[STORE_A, STORE_B]));
    }
}

#[test]
fn invalid_config_is_rejected() {
    let h = Harness::new();
    let result = RoutingCoordinator::new(
        RoutingConfig::default().reader_queue_capacity(0),
        Arc::new(h.lock.clone()),
        h.topology.clone(),
        h.store.clone(),
        h.statistics.clone(),
    );
    assert!(result.is_err());
}
