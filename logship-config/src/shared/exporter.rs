use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{ClusterConfig, PipelineConfig, SentryConfig, SinkConfig, ValidationError};

/// Complete configuration of the exporter service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExporterConfig {
    pub cluster: ClusterConfig,
    pub pipeline: PipelineConfig,
    /// Backend the pipelines write to. Left optional so a missing block surfaces as a
    /// validation error instead of a deserialization one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink: Option<SinkConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentry: Option<SentryConfig>,
}

impl ExporterConfig {
    /// Validates the whole configuration, stopping at the first violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let sink = self.sink.as_ref().ok_or(ValidationError::MissingSink)?;

        self.cluster.validate()?;
        self.pipeline.validate()?;
        sink.validate()
    }
}

impl Config for ExporterConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] =
        &["cluster.include", "cluster.exclude", "sink.urls"];
}
