use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use logship::create_shutdown_channel;
use logship::error::ErrorKind;
use logship::pipeline::{ExportPipeline, PipelineMode, PipelineSettings};
use logship::sink::Sink;
use logship::sink::memory::MemorySink;
use logship::test_utils::failing::FailingSink;
use logship::test_utils::pipeline::{test_settings, test_tenant};
use logship::test_utils::sink::TestSinkWrapper;
use logship::test_utils::source::MemoryLogSource;
use logship::utils::retry::RetryPolicy;
use logship_telemetry::init_test_tracing;

const FIRST_FILE: &str = "20240105000000.lgp";
const SECOND_FILE: &str = "20240106000000.lgp";

fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// Five records spread over two rotated files.
fn backlog() -> MemoryLogSource {
    let source = MemoryLogSource::new();
    source.append(FIRST_FILE, at(5, 9, 0), "{20240105090000,first-1}");
    source.append(FIRST_FILE, at(5, 9, 5), "{20240105090500,first-2}");
    source.append(FIRST_FILE, at(5, 9, 10), "{20240105091000,first-3}");
    source.append(SECOND_FILE, at(6, 0, 1), "{20240106000100,second-1}");
    source.append(SECOND_FILE, at(6, 0, 2), "{20240106000200,second-2}");

    source
}

fn once_settings(load_archive: bool) -> PipelineSettings {
    let mut settings = test_settings("/unused");
    settings.mode = PipelineMode::Once;
    settings.load_archive = load_archive;

    settings
}

#[tokio::test(flavor = "multi_thread")]
async fn archive_mode_exports_the_whole_backlog_in_order() {
    init_test_tracing();
    let source = backlog();
    let sink = TestSinkWrapper::wrap(MemorySink::new());
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let pipeline = ExportPipeline::new(
        test_tenant("Accounting"),
        once_settings(true),
        sink.clone(),
        source,
        shutdown_rx,
    );
    let stats = pipeline.run().await.unwrap();

    assert_eq!(stats.records_exported, 5);
    assert_eq!(stats.batches_written, 3);

    let payloads: Vec<String> = sink
        .records()
        .await
        .into_iter()
        .map(|record| record.payload)
        .collect();
    assert_eq!(
        payloads,
        vec![
            "{20240105090000,first-1}",
            "{20240105090500,first-2}",
            "{20240105091000,first-3}",
            "{20240106000100,second-1}",
            "{20240106000200,second-2}",
        ]
    );

    // Portions of two records, each committed with the position of its last record.
    let checkpoints = sink.checkpoints().await;
    assert_eq!(checkpoints.len(), 3);
    assert!(checkpoints.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(checkpoints[1].file_name, SECOND_FILE);
    assert_eq!(stats.last_checkpoint.as_ref(), checkpoints.last());
}

#[tokio::test(flavor = "multi_thread")]
async fn without_archive_the_backlog_is_skipped() {
    init_test_tracing();
    let sink = TestSinkWrapper::wrap(MemorySink::new());
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let pipeline = ExportPipeline::new(
        test_tenant("Accounting"),
        once_settings(false),
        sink.clone(),
        backlog(),
        shutdown_rx,
    );
    let stats = pipeline.run().await.unwrap();

    assert_eq!(stats.records_exported, 0);
    assert!(sink.records().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn live_records_are_exported_after_starting_at_the_tail() {
    init_test_tracing();
    let source = backlog();
    let sink = TestSinkWrapper::wrap(MemorySink::new());
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let mut settings = test_settings("/unused");
    settings.load_archive = false;
    let pipeline = ExportPipeline::new(
        test_tenant("Accounting"),
        settings,
        sink.clone(),
        source.clone(),
        shutdown_rx,
    );
    let handle = tokio::spawn(pipeline.run());

    // The first read happens after the start position was resolved.
    while source.reads() == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let records_notify = sink.wait_for_records(1).await;
    source.append(SECOND_FILE, at(6, 0, 3), "{20240106000300,live}");
    records_notify.notified().await;

    shutdown_tx.shutdown().unwrap();
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(stats.records_exported, 1);
    let records = sink.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload, "{20240106000300,live}");
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_resumes_after_the_last_checkpoint() {
    init_test_tracing();
    let source = backlog();
    let storage = MemorySink::new();
    let tenant = test_tenant("Accounting");

    let first_run = TestSinkWrapper::wrap(storage.clone());
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    ExportPipeline::new(
        tenant.clone(),
        once_settings(true),
        first_run.clone(),
        source.clone(),
        shutdown_rx,
    )
    .run()
    .await
    .unwrap();

    source.append(SECOND_FILE, at(6, 0, 3), "{20240106000300,second-3}");
    source.append(SECOND_FILE, at(6, 0, 4), "{20240106000400,second-4}");

    let second_run = TestSinkWrapper::wrap(storage.clone());
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let stats = ExportPipeline::new(
        tenant,
        once_settings(true),
        second_run.clone(),
        source,
        shutdown_rx,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(stats.records_exported, 2);
    let history = second_run.history().await;
    assert_eq!(
        history.positions_read,
        vec![first_run.checkpoints().await.last().cloned()]
    );
    assert_eq!(history.records[0].payload, "{20240106000300,second-3}");

    // Checkpoints only move forward across restarts.
    let mut checkpoints = first_run.checkpoints().await;
    checkpoints.extend(history.checkpoints);
    assert!(checkpoints.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(storage.records().await.len(), 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_batch_is_redelivered_after_restart() {
    init_test_tracing();
    let source = backlog();
    let storage = MemorySink::new();
    let faulty = FailingSink::wrap(storage.clone());
    let sink = TestSinkWrapper::wrap(faulty.clone());
    let tenant = test_tenant("Accounting");

    // The second batch fails with an error that is not retried.
    faulty.fail_writes_after(1, ErrorKind::SinkSchemaError);
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let err = ExportPipeline::new(
        tenant.clone(),
        once_settings(true),
        sink.clone(),
        source.clone(),
        shutdown_rx,
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SinkSchemaError);
    assert_eq!(storage.records().await.len(), 2);
    let committed = storage.read_position().await.unwrap();

    faulty.heal();
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let stats = ExportPipeline::new(
        tenant,
        once_settings(true),
        sink.clone(),
        source,
        shutdown_rx,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(stats.records_exported, 3);

    // Nothing up to the committed checkpoint is delivered twice.
    let records = storage.records().await;
    assert_eq!(records.len(), 5);
    assert!(
        records[2..]
            .iter()
            .all(|record| Some(record.checkpoint()) > committed)
    );
    let mut offsets: Vec<_> = records.iter().map(|record| record.checkpoint()).collect();
    offsets.dedup();
    assert_eq!(offsets.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_stops_the_pipeline_after_the_last_attempt() {
    init_test_tracing();
    let faulty = FailingSink::wrap(MemorySink::new());
    faulty.set_retry_policy(RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        backoff_factor: 2.0,
        max_total: Duration::from_secs(60),
    });
    faulty.fail_all_writes(ErrorKind::SinkConnectionFailed);
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let err = ExportPipeline::new(
        test_tenant("Accounting"),
        once_settings(true),
        faulty.clone(),
        backlog(),
        shutdown_rx,
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(
        err.kinds(),
        vec![ErrorKind::RetriesExhausted, ErrorKind::SinkConnectionFailed]
    );
    assert_eq!(faulty.write_attempts(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_an_idle_pipeline() {
    init_test_tracing();
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let mut settings = test_settings("/unused");
    settings.poll_interval = Duration::from_secs(3600);

    let pipeline = ExportPipeline::new(
        test_tenant("Accounting"),
        settings,
        MemorySink::new(),
        MemoryLogSource::new(),
        shutdown_rx,
    );
    let handle = tokio::spawn(pipeline.run());

    shutdown_tx.shutdown().unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pipeline did not observe the shutdown")
        .unwrap()
        .unwrap();

    assert_eq!(stats.records_exported, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_log_data_is_fatal() {
    init_test_tracing();
    let source = backlog();
    source.fail_next_read(ErrorKind::MalformedLogData);
    let sink = TestSinkWrapper::wrap(MemorySink::new());
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let err = ExportPipeline::new(
        test_tenant("Accounting"),
        once_settings(true),
        sink.clone(),
        source,
        shutdown_rx,
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedLogData);
    assert!(sink.records().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_source_is_retried_after_the_poll_interval() {
    init_test_tracing();
    let source = backlog();
    source.fail_next_read(ErrorKind::SourceUnavailable);
    source.fail_next_read(ErrorKind::SourceUnavailable);
    let sink = TestSinkWrapper::wrap(MemorySink::new());
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let stats = ExportPipeline::new(
        test_tenant("Accounting"),
        once_settings(true),
        sink.clone(),
        source.clone(),
        shutdown_rx,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(stats.records_exported, 5);
    assert!(source.reads() >= 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn local_timestamps_are_converted_with_the_configured_zone() {
    init_test_tracing();
    let source = MemoryLogSource::new();
    source.append(FIRST_FILE, at(5, 12, 0), "{20240105120000,N}");
    let sink = TestSinkWrapper::wrap(MemorySink::new());
    let (_shutdown_tx, shutdown_rx) = create_shutdown_channel();

    let mut settings = once_settings(true);
    settings.time_zone = chrono_tz::Europe::Moscow;
    ExportPipeline::new(
        test_tenant("Accounting"),
        settings,
        sink.clone(),
        source,
        shutdown_rx,
    )
    .run()
    .await
    .unwrap();

    let records = sink.records().await;
    assert_eq!(
        records[0].event_time,
        Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap()
    );
}
