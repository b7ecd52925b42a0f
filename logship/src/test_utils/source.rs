use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDateTime;

use crate::error::{ErrorKind, ExportResult};
use crate::export_error;
use crate::pipeline::PipelineSettings;
use crate::source::{LogSource, LogSourceFactory};
use crate::types::{Checkpoint, EventRecord};

#[derive(Debug, Default)]
struct Inner {
    records: Vec<EventRecord>,
    /// Errors returned by the next reads, oldest first.
    read_failures: VecDeque<ErrorKind>,
    reads: usize,
}

/// Log source serving records appended by the test.
///
/// Clones share the same records, so a test can append while a pipeline tails the source.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogSource {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record to `file_name`, positioned after the last record of that file.
    pub fn append(&self, file_name: &str, timestamp: NaiveDateTime, payload: &str) -> EventRecord {
        let mut inner = self.lock();
        let end_offset = inner
            .records
            .iter()
            .rev()
            .find(|record| record.file_name == file_name)
            .map_or(0, |record| record.end_offset)
            + payload.len() as u64
            + 2;

        let record = EventRecord {
            file_name: file_name.to_owned(),
            end_offset,
            timestamp,
            payload: payload.to_owned(),
        };
        inner.records.push(record.clone());
        inner.records.sort_by_key(EventRecord::checkpoint);

        record
    }

    /// Makes the next read fail with `kind`.
    pub fn fail_next_read(&self, kind: ErrorKind) {
        self.lock().read_failures.push_back(kind);
    }

    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogSource for MemoryLogSource {
    async fn read(
        &self,
        from: Option<&Checkpoint>,
        max: usize,
    ) -> ExportResult<Vec<EventRecord>> {
        let mut inner = self.lock();
        inner.reads += 1;

        if let Some(kind) = inner.read_failures.pop_front() {
            return Err(export_error!(kind, "Scripted read failure"));
        }

        Ok(inner
            .records
            .iter()
            .filter(|record| from.is_none_or(|from| record.checkpoint() > *from))
            .take(max)
            .cloned()
            .collect())
    }

    async fn oldest_position(&self) -> ExportResult<Option<Checkpoint>> {
        Ok(self
            .lock()
            .records
            .first()
            .map(|record| Checkpoint::new(record.file_name.clone(), 0)))
    }

    async fn tail_position(&self) -> ExportResult<Option<Checkpoint>> {
        Ok(self.lock().records.last().map(EventRecord::checkpoint))
    }
}

/// Hands the same [`MemoryLogSource`] to every pipeline and supports every folder.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceFactory {
    source: MemoryLogSource,
}

impl MemorySourceFactory {
    pub fn new(source: MemoryLogSource) -> Self {
        Self { source }
    }
}

impl LogSourceFactory for MemorySourceFactory {
    type Source = MemoryLogSource;

    fn is_supported(&self, _log_folder: &Path) -> bool {
        true
    }

    fn open(&self, _settings: &PipelineSettings) -> ExportResult<MemoryLogSource> {
        Ok(self.source.clone())
    }
}
