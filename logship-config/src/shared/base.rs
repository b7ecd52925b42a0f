use std::path::PathBuf;

use thiserror::Error;

/// Configuration validation errors.
///
/// Every variant is fatal: the exporter refuses to start any pipeline while one is present.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no sink is configured, set `sink.kind` to one of `memory`, `postgres`, `clickhouse` or `elasticsearch`")]
    MissingSink,
    #[error("cluster directory `{0}` does not exist or is not a directory")]
    ClusterDirectoryMissing(PathBuf),
    #[error("`{0}` must be greater than zero")]
    ZeroValue(&'static str),
    #[error("`{field}` must be set for the {sink} sink")]
    MissingSinkParameter {
        sink: &'static str,
        field: &'static str,
    },
    #[error("`{0}` is not a known time zone name")]
    UnknownTimeZone(String),
    #[error("`retry.backoff_factor` must be at least 1.0, got {0}")]
    InvalidBackoffFactor(f32),
    #[error("`retry.initial_delay_ms` ({initial}) cannot exceed `retry.max_delay_ms` ({max})")]
    InvalidRetryDelays { initial: u64, max: u64 },
}
