use std::time::Duration;

use anyhow::Context;
use logship::ShutdownTx;
use logship::create_shutdown_channel;
use logship::sink::factory::ConfiguredSinkFactory;
use logship::source::lgp::LgpSourceFactory;
use logship::supervisor::PipelineSupervisor;
use logship::topology::RegistryTopologyWatcher;
use logship_config::shared::{ClusterConfig, ExporterConfig, PipelineConfig, SinkConfig};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

/// Runs the exporter until a shutdown signal arrives, or until every pipeline reached the tail
/// when `pipeline.run_once` is set.
///
/// The initial cluster scan starts one pipeline per tenant, later scans feed the supervisor
/// with topology changes. On shutdown every pipeline finishes its in-flight batch within the
/// configured grace period.
pub async fn start_exporter_with_config(config: ExporterConfig) -> anyhow::Result<()> {
    info!("starting exporter service");

    log_config(&config);

    let sink_config = config
        .sink
        .clone()
        .context("no sink is configured")?;
    let grace = Duration::from_secs(config.pipeline.shutdown_grace_secs);
    let run_once = config.pipeline.run_once;

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let signal_handle = tokio::spawn(forward_shutdown_signal(shutdown_tx.clone()));

    let supervisor = PipelineSupervisor::new(
        ConfiguredSinkFactory::new(sink_config),
        LgpSourceFactory,
        config.pipeline.clone(),
        config.cluster.directory.clone(),
    );

    let watcher = RegistryTopologyWatcher::new(config.cluster.clone());
    let (snapshot, events, watcher_handle) = watcher
        .start(shutdown_tx.subscribe())
        .await
        .context("failed to scan the cluster registry")?;

    for tenant in snapshot.into_values() {
        supervisor.start_detached(tenant);
    }

    if run_once {
        let mut shutdown_rx = shutdown_rx;
        tokio::select! {
            _ = supervisor.wait_until_idle() => info!("every pipeline reached the tail of its log"),
            _ = shutdown_rx.changed() => info!("shutdown requested before the archive was exported"),
        }
        drop(events);
    } else {
        supervisor.run(events, shutdown_rx).await?;
    }

    let _ = shutdown_tx.shutdown();
    let drained = supervisor.shutdown_and_wait(grace).await;

    signal_handle.abort();
    let _ = signal_handle.await;
    let _ = watcher_handle.await;

    if !drained {
        anyhow::bail!(
            "pipelines did not drain within {} seconds",
            grace.as_secs()
        );
    }

    info!("exporter service completed");

    Ok(())
}

/// Signals `shutdown_tx` on SIGINT or SIGTERM.
async fn forward_shutdown_signal(shutdown_tx: ShutdownTx) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => Some(sigterm),
        Err(err) => {
            warn!("failed to register SIGTERM handler: {err}");
            None
        }
    };
    let terminate = async {
        match sigterm.as_mut() {
            Some(sigterm) => {
                sigterm.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT (Ctrl+C) received, shutting down exporter");
        }
        _ = terminate => {
            info!("SIGTERM received, shutting down exporter");
        }
    }

    if let Err(err) = shutdown_tx.shutdown() {
        warn!("failed to send shutdown signal: {err:?}");
    }
}

fn log_config(config: &ExporterConfig) {
    log_cluster_config(&config.cluster);
    log_pipeline_config(&config.pipeline);
    if let Some(sink) = &config.sink {
        log_sink_config(sink);
    }
}

fn log_cluster_config(config: &ClusterConfig) {
    debug!(
        directory = %config.directory.display(),
        registry_file = config.registry_file,
        scan_interval_secs = config.scan_interval_secs,
        include = ?config.include,
        exclude = ?config.exclude,
        "cluster config"
    );
}

fn log_pipeline_config(config: &PipelineConfig) {
    debug!(
        portion_size = config.portion_size,
        collected_factor = config.collected_factor,
        writing_parallelism = config.writing_parallelism,
        poll_interval_secs = config.poll_interval_secs,
        load_archive = config.load_archive,
        run_once = config.run_once,
        time_zone = config.time_zone,
        max_buffered_records = config.max_buffered_records,
        shutdown_grace_secs = config.shutdown_grace_secs,
        "pipeline config"
    );
}

fn log_sink_config(config: &SinkConfig) {
    match config {
        SinkConfig::Memory => {
            debug!("using memory sink config");
        }
        SinkConfig::Postgres {
            host,
            port,
            name,
            username,
            password: _,
            table_prefix,
            retry,
        } => {
            debug!(
                host,
                port,
                dbname = name,
                username,
                table_prefix,
                max_attempts = retry.max_attempts,
                "using postgres sink config"
            );
        }
        SinkConfig::ClickHouse {
            url,
            username,
            password: _,
            retry,
        } => {
            debug!(
                url,
                username,
                max_attempts = retry.max_attempts,
                "using clickhouse sink config"
            );
        }
        SinkConfig::Elasticsearch {
            urls,
            index_prefix,
            bucketing,
            username,
            password: _,
            request_timeout_ms,
            retry,
        } => {
            debug!(
                urls = ?urls,
                index_prefix,
                bucketing = ?bucketing,
                username = ?username,
                request_timeout_ms,
                max_attempts = retry.max_attempts,
                max_total_ms = retry.max_total_ms,
                "using elasticsearch sink config"
            );
        }
    }
}
