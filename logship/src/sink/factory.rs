use std::future::Future;
use std::time::Duration;

use logship_config::shared::SinkConfig;

use crate::error::ExportResult;
use crate::pipeline::PipelineSettings;
use crate::sink::Sink;
use crate::sink::clickhouse::{ClickHouseSink, ClickHouseSinkOptions};
use crate::sink::elasticsearch::{ElasticsearchSink, ElasticsearchSinkOptions};
use crate::sink::memory::MemorySink;
use crate::sink::postgres::{PostgresSink, PostgresSinkOptions};
use crate::types::{Checkpoint, ExportRecord, TenantDescriptor};
use crate::utils::retry::RetryPolicy;

/// Builds the sink of a tenant pipeline.
pub trait SinkFactory: Send + Sync + 'static {
    type Sink: Sink + Send + Sync + 'static;

    fn create_sink(
        &self,
        tenant: &TenantDescriptor,
        settings: &PipelineSettings,
    ) -> impl Future<Output = ExportResult<Self::Sink>> + Send;
}

/// Closed set of sink backends selected from configuration.
pub enum ExportSink {
    Memory(MemorySink),
    Postgres(PostgresSink),
    ClickHouse(ClickHouseSink),
    Elasticsearch(ElasticsearchSink),
}

impl Sink for ExportSink {
    async fn read_position(&self) -> ExportResult<Option<Checkpoint>> {
        match self {
            ExportSink::Memory(sink) => sink.read_position().await,
            ExportSink::Postgres(sink) => sink.read_position().await,
            ExportSink::ClickHouse(sink) => sink.read_position().await,
            ExportSink::Elasticsearch(sink) => sink.read_position().await,
        }
    }

    async fn write_batch(
        &self,
        records: Vec<ExportRecord>,
        checkpoint: Checkpoint,
    ) -> ExportResult<()> {
        match self {
            ExportSink::Memory(sink) => sink.write_batch(records, checkpoint).await,
            ExportSink::Postgres(sink) => sink.write_batch(records, checkpoint).await,
            ExportSink::ClickHouse(sink) => sink.write_batch(records, checkpoint).await,
            ExportSink::Elasticsearch(sink) => sink.write_batch(records, checkpoint).await,
        }
    }
}

/// Maps the configured backend and a tenant's database name to a ready sink.
#[derive(Debug, Clone)]
pub struct ConfiguredSinkFactory {
    config: SinkConfig,
}

impl ConfiguredSinkFactory {
    pub fn new(config: SinkConfig) -> Self {
        Self { config }
    }
}

impl SinkFactory for ConfiguredSinkFactory {
    type Sink = ExportSink;

    async fn create_sink(
        &self,
        tenant: &TenantDescriptor,
        settings: &PipelineSettings,
    ) -> ExportResult<ExportSink> {
        let database = tenant.database_name.clone();

        let sink = match &self.config {
            SinkConfig::Memory => ExportSink::Memory(MemorySink::new()),
            SinkConfig::Postgres {
                host,
                port,
                name,
                username,
                password,
                table_prefix,
                retry,
            } => {
                let options = PostgresSinkOptions {
                    host: host.clone(),
                    port: *port,
                    database: name.clone(),
                    username: username.clone(),
                    password: password.clone(),
                    table: format!("{table_prefix}_{database}"),
                    retry: RetryPolicy::from(retry),
                };
                ExportSink::Postgres(PostgresSink::connect(options).await?)
            }
            SinkConfig::ClickHouse {
                url,
                username,
                password,
                retry,
            } => {
                let options = ClickHouseSinkOptions {
                    url: url.clone(),
                    username: username.clone(),
                    password: password.clone(),
                    database,
                    retry: RetryPolicy::from(retry),
                };
                ExportSink::ClickHouse(ClickHouseSink::connect(options).await?)
            }
            SinkConfig::Elasticsearch {
                urls,
                index_prefix,
                bucketing,
                username,
                password,
                request_timeout_ms,
                retry,
            } => {
                let options = ElasticsearchSinkOptions {
                    urls: urls.clone(),
                    index_prefix: index_prefix.clone(),
                    database,
                    bucketing: *bucketing,
                    username: username.clone(),
                    password: password.clone(),
                    request_timeout: Duration::from_millis(*request_timeout_ms),
                    writing_parallelism: settings.writing_parallelism,
                    retry: RetryPolicy::from(retry),
                };
                ExportSink::Elasticsearch(ElasticsearchSink::new(options)?)
            }
        };

        Ok(sink)
    }
}
