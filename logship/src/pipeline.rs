use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use logship_config::shared::PipelineConfig;
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownRx, is_shutdown_requested, sleep_or_shutdown};
use crate::conversions::time::{local_to_utc, parse_time_zone};
use crate::error::{ErrorKind, ExportResult};
use crate::sink::Sink;
use crate::source::LogSource;
use crate::source::lgp::LOG_FOLDER_NAME;
use crate::types::{Checkpoint, EventRecord, ExportRecord, TenantDescriptor};

/// Whether a pipeline keeps tailing the log once it reached the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Poll for new records forever.
    Continuous,
    /// Stop at the first empty read.
    Once,
}

/// Immutable settings of one tenant pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub log_folder: PathBuf,
    pub portion_size: usize,
    pub collected_factor: usize,
    pub writing_parallelism: usize,
    pub poll_interval: Duration,
    pub load_archive: bool,
    pub time_zone: Tz,
    pub max_buffered_records: usize,
    pub mode: PipelineMode,
}

impl PipelineSettings {
    /// Derives the settings of `tenant` from the shared configuration.
    ///
    /// The log folder is `<cluster_dir>/<tenant id>/1Cv8Log`.
    pub fn for_tenant(
        config: &PipelineConfig,
        cluster_dir: &Path,
        tenant: &TenantDescriptor,
    ) -> ExportResult<Self> {
        Ok(Self {
            log_folder: cluster_dir
                .join(tenant.id.to_string())
                .join(LOG_FOLDER_NAME),
            portion_size: config.portion_size.max(1),
            collected_factor: config.collected_factor.max(1),
            writing_parallelism: config.writing_parallelism.max(1),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            load_archive: config.load_archive,
            time_zone: parse_time_zone(&config.time_zone)?,
            max_buffered_records: config.max_buffered_records.max(1),
            mode: if config.run_once {
                PipelineMode::Once
            } else {
                PipelineMode::Continuous
            },
        })
    }

    /// Records requested per source read, capped by the read-ahead limit.
    pub fn read_limit(&self) -> usize {
        self.portion_size
            .saturating_mul(self.collected_factor)
            .min(self.max_buffered_records)
            .max(1)
    }
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub records_exported: u64,
    pub batches_written: u64,
    pub last_checkpoint: Option<Checkpoint>,
}

/// Moves the records of one tenant from its log source into its sink.
///
/// Batches are written one after the other, each carrying the checkpoint of its last record,
/// so checkpoints become visible in submission order. A shutdown signal is honored between
/// batches, during reads and during idle polls, never in the middle of a write.
#[derive(Debug)]
pub struct ExportPipeline<S, L> {
    tenant: TenantDescriptor,
    settings: PipelineSettings,
    sink: S,
    source: L,
    shutdown_rx: ShutdownRx,
}

impl<S, L> ExportPipeline<S, L>
where
    S: Sink + Send + Sync,
    L: LogSource + Send + Sync,
{
    pub fn new(
        tenant: TenantDescriptor,
        settings: PipelineSettings,
        sink: S,
        source: L,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            tenant,
            settings,
            sink,
            source,
            shutdown_rx,
        }
    }

    /// Runs the pipeline until it is cancelled, reaches the tail in [`PipelineMode::Once`], or
    /// hits a fatal error.
    pub async fn run(mut self) -> ExportResult<PipelineStats> {
        let mut stats = PipelineStats::default();

        let Some(mut cursor) = self.resolve_start().await? else {
            info!(tenant_id = %self.tenant.id, "pipeline cancelled before start");
            return Ok(stats);
        };

        let read_limit = self.settings.read_limit();
        loop {
            if is_shutdown_requested(&self.shutdown_rx) {
                break;
            }

            let read = tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => break,
                read = self.source.read(cursor.as_ref(), read_limit) => read,
            };

            let records = match read {
                Ok(records) => records,
                Err(err) if err.kind() == ErrorKind::SourceUnavailable => {
                    warn!(
                        tenant_id = %self.tenant.id,
                        file = cursor_file(&cursor),
                        offset = cursor_offset(&cursor),
                        error = %err,
                        "event log unavailable, retrying after poll interval"
                    );
                    if self.idle().await {
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    error!(
                        critical = true,
                        tenant_id = %self.tenant.id,
                        file = cursor_file(&cursor),
                        offset = cursor_offset(&cursor),
                        error = %err,
                        "failed to read event log"
                    );
                    return Err(err);
                }
            };

            if records.is_empty() {
                if self.settings.mode == PipelineMode::Once {
                    info!(tenant_id = %self.tenant.id, "reached the tail of the event log");
                    break;
                }
                if self.idle().await {
                    break;
                }
                continue;
            }

            debug!(
                tenant_id = %self.tenant.id,
                records = records.len(),
                "read records from event log"
            );

            let mut records = records.into_iter().peekable();
            while records.peek().is_some() {
                let portion: Vec<EventRecord> =
                    records.by_ref().take(self.settings.portion_size).collect();
                let checkpoint = self.flush(portion, &cursor, &mut stats).await?;
                cursor = Some(checkpoint);

                if is_shutdown_requested(&self.shutdown_rx) {
                    info!(
                        tenant_id = %self.tenant.id,
                        file = cursor_file(&cursor),
                        offset = cursor_offset(&cursor),
                        "pipeline cancelled after flush"
                    );
                    return Ok(stats);
                }
            }
        }

        info!(
            tenant_id = %self.tenant.id,
            records = stats.records_exported,
            batches = stats.batches_written,
            "pipeline stopped"
        );

        Ok(stats)
    }

    /// Picks the cursor to start from. Returns `None` when cancelled while waiting for the
    /// source.
    async fn resolve_start(&mut self) -> ExportResult<Option<Option<Checkpoint>>> {
        if let Some(checkpoint) = self.sink.read_position().await? {
            info!(
                tenant_id = %self.tenant.id,
                file = %checkpoint.file_name,
                offset = checkpoint.file_offset,
                "resuming from sink checkpoint"
            );
            return Ok(Some(Some(checkpoint)));
        }

        loop {
            let position = if self.settings.load_archive {
                self.source.oldest_position().await
            } else {
                self.source.tail_position().await
            };

            match position {
                Ok(position) => {
                    info!(
                        tenant_id = %self.tenant.id,
                        load_archive = self.settings.load_archive,
                        start = ?position,
                        "no checkpoint in sink, starting fresh"
                    );
                    return Ok(Some(position));
                }
                Err(err) if err.kind() == ErrorKind::SourceUnavailable => {
                    warn!(
                        tenant_id = %self.tenant.id,
                        error = %err,
                        "event log unavailable, retrying after poll interval"
                    );
                    if self.idle().await {
                        return Ok(None);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Converts and writes one portion, returning the committed checkpoint.
    async fn flush(
        &self,
        portion: Vec<EventRecord>,
        cursor: &Option<Checkpoint>,
        stats: &mut PipelineStats,
    ) -> ExportResult<Checkpoint> {
        let Some(checkpoint) = portion.last().map(EventRecord::checkpoint) else {
            bail!(ErrorKind::InvalidState, "Cannot flush an empty batch");
        };

        let records: Vec<ExportRecord> = portion
            .into_iter()
            .map(|record| ExportRecord {
                event_time: local_to_utc(record.timestamp, &self.settings.time_zone),
                file_name: record.file_name,
                file_offset: record.end_offset,
                payload: record.payload,
            })
            .collect();
        let count = records.len() as u64;

        if let Err(err) = self.sink.write_batch(records, checkpoint.clone()).await {
            error!(
                critical = true,
                tenant_id = %self.tenant.id,
                file = cursor_file(cursor),
                offset = cursor_offset(cursor),
                batch_end = %checkpoint,
                error = %err,
                "failed to write batch to sink"
            );
            return Err(err);
        }

        stats.records_exported += count;
        stats.batches_written += 1;
        stats.last_checkpoint = Some(checkpoint.clone());

        debug!(
            tenant_id = %self.tenant.id,
            records = count,
            %checkpoint,
            "batch committed"
        );

        Ok(checkpoint)
    }

    /// Sleeps for the poll interval. Returns `true` if a shutdown interrupted the sleep.
    async fn idle(&mut self) -> bool {
        sleep_or_shutdown(self.settings.poll_interval, &mut self.shutdown_rx)
            .await
            .should_shutdown()
    }
}

fn cursor_file(cursor: &Option<Checkpoint>) -> &str {
    cursor.as_ref().map_or("", |c| c.file_name.as_str())
}

fn cursor_offset(cursor: &Option<Checkpoint>) -> u64 {
    cursor.as_ref().map_or(0, |c| c.file_offset)
}
