use std::time::Duration;

use logship::create_shutdown_channel;
use logship::error::ErrorKind;
use logship::source::lgp::LgpSourceFactory;
use logship::supervisor::{PipelineState, PipelineSupervisor};
use logship::test_utils::cluster::{TestCluster, lgp_record};
use logship::test_utils::pipeline::test_pipeline_config;
use logship::test_utils::sink::MemorySinkFactory;
use logship::topology::TopologyEvent;
use logship::types::TenantId;
use logship_telemetry::init_test_tracing;
use tokio::sync::mpsc;

const LOG_FILE: &str = "20240105000000.lgp";

const WAIT: Duration = Duration::from_secs(10);

type TestSupervisor = PipelineSupervisor<MemorySinkFactory, LgpSourceFactory>;

fn supervisor(cluster: &TestCluster, sink_factory: &MemorySinkFactory) -> TestSupervisor {
    PipelineSupervisor::new(
        sink_factory.clone(),
        LgpSourceFactory,
        test_pipeline_config(),
        cluster.path(),
    )
}

fn records(count: usize, label: &str) -> Vec<String> {
    (0..count)
        .map(|i| lgp_record(&format!("202401050900{i:02}"), &format!("{label} {i}")))
        .collect()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn wait_for_unregistered(supervisor: &TestSupervisor, id: TenantId) {
    wait_until(|| supervisor.pipeline_state(id).is_none()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_starts_launch_a_single_pipeline() {
    init_test_tracing();
    let mut cluster = TestCluster::new();
    let tenant = cluster.add_tenant("Accounting");
    cluster.append_records(tenant.id, LOG_FILE, &records(3, "accounting"));
    let sink_factory = MemorySinkFactory::new();
    let supervisor = supervisor(&cluster, &sink_factory);

    let records_notify = sink_factory.sink(tenant.id).wait_for_records(3).await;
    let (first, second) = tokio::join!(
        supervisor.start(tenant.clone()),
        supervisor.start(tenant.clone())
    );

    assert_eq!(
        [first.unwrap(), second.unwrap()]
            .iter()
            .filter(|started| **started)
            .count(),
        1
    );
    assert_eq!(supervisor.active_tenants(), vec![tenant.id]);
    assert!(!supervisor.start(tenant.clone()).await.unwrap());

    records_notify.notified().await;
    assert_eq!(sink_factory.created(), 1);
    assert_eq!(sink_factory.sink(tenant.id).records().await.len(), 3);

    assert!(supervisor.shutdown_and_wait(WAIT).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn add_immediately_followed_by_remove_leaves_no_pipeline() {
    init_test_tracing();
    let mut cluster = TestCluster::new();
    let tenant = cluster.add_tenant("Accounting");
    cluster.append_records(tenant.id, LOG_FILE, &records(2, "accounting"));
    let sink_factory = MemorySinkFactory::new().with_create_delay(Duration::from_millis(200));
    let supervisor = supervisor(&cluster, &sink_factory);

    let (events_tx, events_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let run = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(events_rx, shutdown_rx).await }
    });

    events_tx
        .send(TopologyEvent::TenantAdded(tenant.clone()))
        .await
        .unwrap();
    events_tx
        .send(TopologyEvent::TenantRemoved {
            id: tenant.id,
            name: tenant.display_name.clone(),
        })
        .await
        .unwrap();

    assert!(supervisor.wait_idle(WAIT).await);
    assert!(supervisor.active_tenants().is_empty());
    assert!(sink_factory.sink(tenant.id).records().await.is_empty());

    shutdown_tx.shutdown().unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_of_a_running_pipeline_unregisters_it() {
    init_test_tracing();
    let mut cluster = TestCluster::new();
    let tenant = cluster.add_tenant("Accounting");
    let sink_factory = MemorySinkFactory::new();
    let supervisor = supervisor(&cluster, &sink_factory);

    assert!(supervisor.start(tenant.clone()).await.unwrap());
    assert!(supervisor.is_running(tenant.id));

    assert!(supervisor.stop(tenant.id));
    wait_for_unregistered(&supervisor, tenant.id).await;

    assert!(!supervisor.stop(tenant.id));
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_pipeline_does_not_affect_other_tenants() {
    init_test_tracing();
    let mut cluster = TestCluster::new();
    let broken = cluster.add_tenant("Accounting");
    let healthy = cluster.add_tenant("Warehouse");
    cluster.append_records(broken.id, LOG_FILE, &records(2, "accounting"));
    cluster.append_records(healthy.id, LOG_FILE, &records(2, "warehouse"));
    let sink_factory = MemorySinkFactory::new();
    let supervisor = supervisor(&cluster, &sink_factory);

    let broken_sink = sink_factory.sink(broken.id);
    broken_sink
        .wrapped()
        .await
        .fail_all_writes(ErrorKind::SinkSchemaError);
    let failed_notify = broken_sink.wait_for_failed_writes(1).await;
    let records_notify = sink_factory.sink(healthy.id).wait_for_records(2).await;

    assert!(supervisor.start(broken.clone()).await.unwrap());
    assert!(supervisor.start(healthy.clone()).await.unwrap());

    failed_notify.notified().await;
    records_notify.notified().await;
    wait_for_unregistered(&supervisor, broken.id).await;

    assert!(supervisor.is_running(healthy.id));
    cluster.append_records(healthy.id, LOG_FILE, &records(1, "warehouse live"));
    let live_notify = sink_factory.sink(healthy.id).wait_for_records(3).await;
    live_notify.notified().await;

    assert!(supervisor.shutdown_and_wait(WAIT).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn tenants_in_the_new_log_format_are_skipped() {
    init_test_tracing();
    let mut cluster = TestCluster::new();
    let tenant = cluster.add_sqlite_tenant("Accounting");
    let sink_factory = MemorySinkFactory::new();
    let supervisor = supervisor(&cluster, &sink_factory);

    assert!(!supervisor.start(tenant.clone()).await.unwrap());
    assert!(supervisor.active_tenants().is_empty());
    assert_eq!(sink_factory.created(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_drains_every_pipeline() {
    init_test_tracing();
    let mut cluster = TestCluster::new();
    let first = cluster.add_tenant("Accounting");
    let second = cluster.add_tenant("Warehouse");
    cluster.append_records(first.id, LOG_FILE, &records(3, "accounting"));
    cluster.append_records(second.id, LOG_FILE, &records(3, "warehouse"));
    let sink_factory = MemorySinkFactory::new();
    let supervisor = supervisor(&cluster, &sink_factory);

    let first_notify = sink_factory.sink(first.id).wait_for_records(3).await;
    let second_notify = sink_factory.sink(second.id).wait_for_records(3).await;
    supervisor.start(first.clone()).await.unwrap();
    supervisor.start(second.clone()).await.unwrap();
    first_notify.notified().await;
    second_notify.notified().await;

    assert!(supervisor.shutdown_and_wait(WAIT).await);
    assert!(supervisor.active_tenants().is_empty());

    // No pipeline starts once the supervisor is shutting down.
    assert!(!supervisor.start(first.clone()).await.unwrap());
    assert!(supervisor.active_tenants().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_after_stop_resumes_from_the_checkpoint() {
    init_test_tracing();
    let mut cluster = TestCluster::new();
    let tenant = cluster.add_tenant("Accounting");
    cluster.append_records(tenant.id, LOG_FILE, &records(3, "accounting"));
    let sink_factory = MemorySinkFactory::new();
    let supervisor = supervisor(&cluster, &sink_factory);
    let sink = sink_factory.sink(tenant.id);

    let (events_tx, events_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let run = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.run(events_rx, shutdown_rx).await }
    });

    let first_notify = sink.wait_for_records(3).await;
    events_tx
        .send(TopologyEvent::TenantAdded(tenant.clone()))
        .await
        .unwrap();
    first_notify.notified().await;

    // A rename arrives as a removal followed by an addition of the same id.
    let renamed = cluster.rename_tenant(tenant.id, "Accounting 2024");
    let restarted_notify = sink
        .notify_on(|history| history.positions_read.len() >= 2)
        .await;
    events_tx
        .send(TopologyEvent::TenantRemoved {
            id: tenant.id,
            name: tenant.display_name.clone(),
        })
        .await
        .unwrap();
    events_tx
        .send(TopologyEvent::TenantAdded(renamed))
        .await
        .unwrap();
    restarted_notify.notified().await;

    let live_notify = sink.wait_for_records(5).await;
    cluster.append_records(tenant.id, LOG_FILE, &records(2, "accounting live"));
    live_notify.notified().await;

    let history = sink.history().await;
    assert_eq!(history.records.len(), 5);
    assert_eq!(history.positions_read[0], None);
    assert_eq!(history.positions_read[1], history.checkpoints.get(1).cloned());
    wait_until(|| supervisor.pipeline_state(tenant.id) == Some(PipelineState::Running)).await;

    shutdown_tx.shutdown().unwrap();
    run.await.unwrap().unwrap();
    assert!(supervisor.shutdown_and_wait(WAIT).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_detached_start_unregisters_the_tenant() {
    init_test_tracing();
    let mut cluster = TestCluster::new();
    let tenant = cluster.add_tenant("Accounting");
    let sink_factory = MemorySinkFactory::new();
    let mut config = test_pipeline_config();
    config.time_zone = "Mars/Olympus".to_owned();
    let supervisor =
        PipelineSupervisor::new(sink_factory.clone(), LgpSourceFactory, config, cluster.path());

    supervisor.start_detached(tenant.clone());
    assert!(supervisor.pipeline_state(tenant.id).is_some());

    assert!(supervisor.wait_idle(WAIT).await);
    assert!(supervisor.active_tenants().is_empty());
    assert_eq!(sink_factory.created(), 0);
}
