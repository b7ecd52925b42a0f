use std::time::Duration;

use logship::create_shutdown_channel;
use logship::error::ErrorKind;
use logship::test_utils::cluster::TestCluster;
use logship::topology::{RegistryTopologyWatcher, TopologyEvent};
use logship_config::shared::DEFAULT_REGISTRY_FILE;
use logship_telemetry::init_test_tracing;
use tokio::sync::mpsc;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

async fn next_event(events: &mut mpsc::Receiver<TopologyEvent>) -> TopologyEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("no topology event in time")
        .expect("topology watcher stopped")
}

#[tokio::test]
async fn scan_keeps_selected_tenants_with_a_folder() {
    let mut cluster = TestCluster::new();
    let accounting = cluster.add_tenant("Accounting");
    let sandbox = cluster.add_tenant("Sandbox copy");
    let warehouse = cluster.add_tenant("Склад");
    std::fs::remove_dir_all(cluster.path().join(warehouse.id.to_string())).unwrap();

    let mut config = cluster.cluster_config();
    config.exclude = vec!["sandbox COPY".to_owned()];
    let snapshot = RegistryTopologyWatcher::new(config).scan().await.unwrap();

    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.get(&accounting.id), Some(&accounting));
    assert!(!snapshot.contains_key(&sandbox.id));
}

#[tokio::test]
async fn missing_registry_fails_the_initial_scan() {
    let cluster = TestCluster::new();
    std::fs::remove_file(cluster.path().join(DEFAULT_REGISTRY_FILE)).unwrap();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let err = RegistryTopologyWatcher::new(cluster.cluster_config())
        .start(shutdown_rx)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceUnavailable);
}

#[tokio::test(flavor = "multi_thread")]
async fn registry_changes_are_reported_as_events() {
    init_test_tracing();
    let mut cluster = TestCluster::new();
    let accounting = cluster.add_tenant("Accounting");
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (snapshot, mut events, handle) = RegistryTopologyWatcher::new(cluster.cluster_config())
        .start(shutdown_rx)
        .await
        .unwrap();
    assert_eq!(snapshot.keys().copied().collect::<Vec<_>>(), vec![accounting.id]);

    let warehouse = cluster.add_tenant("Warehouse");
    assert_eq!(
        next_event(&mut events).await,
        TopologyEvent::TenantAdded(warehouse.clone())
    );

    cluster.remove_tenant(accounting.id);
    assert_eq!(
        next_event(&mut events).await,
        TopologyEvent::TenantRemoved {
            id: accounting.id,
            name: accounting.display_name.clone(),
        }
    );

    let renamed = cluster.rename_tenant(warehouse.id, "Warehouse 2024");
    assert_eq!(
        next_event(&mut events).await,
        TopologyEvent::TenantRemoved {
            id: warehouse.id,
            name: warehouse.display_name.clone(),
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        TopologyEvent::TenantAdded(renamed)
    );

    shutdown_tx.shutdown().unwrap();
    tokio::time::timeout(EVENT_TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unreadable_registry_keeps_the_previous_snapshot() {
    init_test_tracing();
    let mut cluster = TestCluster::new();
    cluster.add_tenant("Accounting");
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (_snapshot, mut events, handle) = RegistryTopologyWatcher::new(cluster.cluster_config())
        .start(shutdown_rx)
        .await
        .unwrap();

    let registry = cluster.path().join(DEFAULT_REGISTRY_FILE);
    std::fs::remove_file(&registry).unwrap();

    // Several rescans fail without reporting the tenant as removed.
    let quiet = tokio::time::timeout(Duration::from_millis(2500), events.recv()).await;
    assert!(quiet.is_err());

    // Rewrites the registry with both tenants.
    let warehouse = cluster.add_tenant("Warehouse");
    assert_eq!(
        next_event(&mut events).await,
        TopologyEvent::TenantAdded(warehouse)
    );
    assert!(events.try_recv().is_err());

    shutdown_tx.shutdown().unwrap();
    tokio::time::timeout(EVENT_TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn watcher_stops_when_the_receiver_is_dropped() {
    let mut cluster = TestCluster::new();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let (_snapshot, events, handle) = RegistryTopologyWatcher::new(cluster.cluster_config())
        .start(shutdown_rx)
        .await
        .unwrap();
    drop(events);

    cluster.add_tenant("Accounting");

    tokio::time::timeout(EVENT_TIMEOUT, handle)
        .await
        .unwrap()
        .unwrap();
}
