use std::future::Future;

use crate::error::ExportResult;
use crate::types::{Checkpoint, ExportRecord};

/// Storage backend a pipeline exports records to.
///
/// A sink owns its checkpoint: [`Sink::read_position`] returns the last position committed by
/// [`Sink::write_batch`], and no caller may ever observe the records of a batch without its
/// checkpoint, or the checkpoint without the records.
pub trait Sink {
    /// Returns the last committed position, or `None` when nothing was ever written.
    fn read_position(&self) -> impl Future<Output = ExportResult<Option<Checkpoint>>> + Send;

    /// Writes `records` and commits `checkpoint` with them.
    ///
    /// Retries on transient failures are the sink's responsibility. An error means neither the
    /// batch nor the checkpoint can be assumed committed.
    fn write_batch(
        &self,
        records: Vec<ExportRecord>,
        checkpoint: Checkpoint,
    ) -> impl Future<Output = ExportResult<()>> + Send;
}
