use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use logship_config::shared::PipelineConfig;
use uuid::Uuid;

use crate::pipeline::{PipelineMode, PipelineSettings};
use crate::types::{TenantDescriptor, TenantId};

/// Pipeline tuning small enough to exercise batching with a handful of records.
pub fn test_pipeline_config() -> PipelineConfig {
    PipelineConfig {
        portion_size: 2,
        collected_factor: 2,
        writing_parallelism: 2,
        poll_interval_secs: 1,
        load_archive: true,
        run_once: false,
        time_zone: "UTC".to_owned(),
        max_buffered_records: 1000,
        shutdown_grace_secs: 5,
    }
}

/// Settings matching [`test_pipeline_config`] with a short poll interval.
pub fn test_settings(log_folder: impl Into<PathBuf>) -> PipelineSettings {
    PipelineSettings {
        log_folder: log_folder.into(),
        portion_size: 2,
        collected_factor: 2,
        writing_parallelism: 2,
        poll_interval: Duration::from_millis(50),
        load_archive: true,
        time_zone: Tz::UTC,
        max_buffered_records: 1000,
        mode: PipelineMode::Continuous,
    }
}

pub fn test_tenant(name: &str) -> TenantDescriptor {
    TenantDescriptor::new(TenantId::new(Uuid::new_v4()), name)
}
