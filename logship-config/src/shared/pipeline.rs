use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Tuning shared by every tenant pipeline.
///
/// Per-tenant settings are derived from this plus the tenant's own log folder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of records written to a sink in a single batch.
    pub portion_size: usize,
    /// How many portions are read from the log before they are flushed.
    pub collected_factor: usize,
    /// Upper bound of concurrent write requests issued while flushing one batch.
    pub writing_parallelism: usize,
    /// Seconds to sleep once the tail of the log has been reached.
    pub poll_interval_secs: u64,
    /// Whether a tenant without a checkpoint starts from its oldest retained file instead of the
    /// current tail.
    #[serde(default)]
    pub load_archive: bool,
    /// Stop once the tail is reached instead of tailing the log forever.
    #[serde(default)]
    pub run_once: bool,
    /// IANA name of the zone the log timestamps were written in.
    pub time_zone: String,
    /// Hard cap on the number of records read ahead of the sink.
    #[serde(default = "default_max_buffered_records")]
    pub max_buffered_records: usize,
    /// Seconds the exporter waits for pipelines to drain on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.portion_size == 0 {
            return Err(ValidationError::ZeroValue("pipeline.portion_size"));
        }
        if self.collected_factor == 0 {
            return Err(ValidationError::ZeroValue("pipeline.collected_factor"));
        }
        if self.writing_parallelism == 0 {
            return Err(ValidationError::ZeroValue("pipeline.writing_parallelism"));
        }
        if self.poll_interval_secs == 0 {
            return Err(ValidationError::ZeroValue("pipeline.poll_interval_secs"));
        }
        if self.max_buffered_records == 0 {
            return Err(ValidationError::ZeroValue("pipeline.max_buffered_records"));
        }

        self.time_zone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| ValidationError::UnknownTimeZone(self.time_zone.clone()))?;

        Ok(())
    }
}

fn default_max_buffered_records() -> usize {
    100_000
}

fn default_shutdown_grace_secs() -> u64 {
    30
}
