use std::future::Future;
use std::path::Path;

use crate::error::ExportResult;
use crate::pipeline::PipelineSettings;
use crate::types::{Checkpoint, EventRecord};

/// Ordered, restartable stream of a tenant's log records.
///
/// Reads fail with [`crate::error::ErrorKind::SourceUnavailable`] when the log cannot be
/// accessed right now and with [`crate::error::ErrorKind::MalformedLogData`] when its content
/// cannot be parsed. Only the former is worth retrying.
pub trait LogSource {
    /// Reads at most `max` records located after `from`, in stream order.
    ///
    /// `None` reads from the start of the oldest retained file. An empty result means the tail
    /// was reached.
    fn read(
        &self,
        from: Option<&Checkpoint>,
        max: usize,
    ) -> impl Future<Output = ExportResult<Vec<EventRecord>>> + Send;

    /// Position before the first retained record, `None` while no data file exists.
    fn oldest_position(&self) -> impl Future<Output = ExportResult<Option<Checkpoint>>> + Send;

    /// Position after the last complete record, `None` while no data file exists.
    fn tail_position(&self) -> impl Future<Output = ExportResult<Option<Checkpoint>>> + Send;
}

/// Opens the log source of a tenant pipeline.
pub trait LogSourceFactory: Send + Sync + 'static {
    type Source: LogSource + Send + Sync + 'static;

    /// Returns whether the log stored in `log_folder` is in a format this factory reads.
    fn is_supported(&self, log_folder: &Path) -> bool;

    fn open(&self, settings: &PipelineSettings) -> ExportResult<Self::Source>;
}
