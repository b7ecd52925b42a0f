use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, ExportResult};
use crate::sink::Sink;
use crate::types::{Checkpoint, ExportRecord};

#[derive(Debug, Default)]
struct Inner {
    records: Vec<ExportRecord>,
    checkpoint: Option<Checkpoint>,
    batches: usize,
}

/// Sink keeping everything in process memory.
///
/// Clones share the same storage, so a restarted pipeline given a clone resumes from the
/// checkpoint left by the previous one.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ExportRecord> {
        self.inner.lock().await.records.clone()
    }

    pub async fn batches(&self) -> usize {
        self.inner.lock().await.batches
    }
}

impl Sink for MemorySink {
    async fn read_position(&self) -> ExportResult<Option<Checkpoint>> {
        Ok(self.inner.lock().await.checkpoint.clone())
    }

    async fn write_batch(
        &self,
        records: Vec<ExportRecord>,
        checkpoint: Checkpoint,
    ) -> ExportResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(current) = &inner.checkpoint
            && checkpoint < *current
        {
            bail!(
                ErrorKind::InvalidState,
                "Checkpoint would move backwards",
                format!("current {current}, new {checkpoint}")
            );
        }

        debug!(records = records.len(), %checkpoint, "writing batch to memory");

        inner.records.extend(records);
        inner.checkpoint = Some(checkpoint);
        inner.batches += 1;

        Ok(())
    }
}
