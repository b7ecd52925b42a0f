use serde::{Deserialize, Serialize};

use crate::SerializableSecretString;
use crate::shared::{RetryConfig, ValidationError};

/// Time granularity used to split search indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBucketing {
    Hour,
    Day,
    Month,
    #[default]
    None,
}

/// Storage backend every tenant pipeline writes to.
///
/// The variant is selected with the `kind` key, e.g. `APP_SINK__KIND=postgres`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Process-local sink, records are kept in memory.
    Memory,
    /// Relational sink, one table per tenant.
    Postgres {
        host: String,
        port: u16,
        /// Database holding the per-tenant tables.
        name: String,
        username: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<SerializableSecretString>,
        /// Tenant tables are named `<table_prefix>_<database>`.
        #[serde(default = "default_table_prefix")]
        table_prefix: String,
        #[serde(default)]
        retry: RetryConfig,
    },
    /// Columnar sink, one ClickHouse database per tenant.
    #[serde(rename = "clickhouse")]
    ClickHouse {
        url: String,
        username: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<SerializableSecretString>,
        #[serde(default)]
        retry: RetryConfig,
    },
    /// Search index sink, indexes named `<index_prefix>-<database>[-bucket]`.
    Elasticsearch {
        /// Cluster nodes, used round robin.
        urls: Vec<String>,
        index_prefix: String,
        #[serde(default)]
        bucketing: IndexBucketing,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<SerializableSecretString>,
        #[serde(default = "default_request_timeout_ms")]
        request_timeout_ms: u64,
        #[serde(default)]
        retry: RetryConfig,
    },
}

impl SinkConfig {
    /// Short name of the backend, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SinkConfig::Memory => "memory",
            SinkConfig::Postgres { .. } => "postgres",
            SinkConfig::ClickHouse { .. } => "clickhouse",
            SinkConfig::Elasticsearch { .. } => "elasticsearch",
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let kind = self.kind();
        let missing = |field| ValidationError::MissingSinkParameter { sink: kind, field };

        match self {
            SinkConfig::Memory => Ok(()),
            SinkConfig::Postgres {
                host,
                port,
                name,
                username,
                table_prefix,
                retry,
                ..
            } => {
                if host.is_empty() {
                    return Err(missing("host"));
                }
                if *port == 0 {
                    return Err(missing("port"));
                }
                if name.is_empty() {
                    return Err(missing("name"));
                }
                if username.is_empty() {
                    return Err(missing("username"));
                }
                if table_prefix.is_empty() {
                    return Err(missing("table_prefix"));
                }
                retry.validate()
            }
            SinkConfig::ClickHouse {
                url,
                username,
                retry,
                ..
            } => {
                if url.is_empty() {
                    return Err(missing("url"));
                }
                if username.is_empty() {
                    return Err(missing("username"));
                }
                retry.validate()
            }
            SinkConfig::Elasticsearch {
                urls,
                index_prefix,
                request_timeout_ms,
                retry,
                ..
            } => {
                if urls.is_empty() || urls.iter().any(|url| url.is_empty()) {
                    return Err(missing("urls"));
                }
                if index_prefix.is_empty() {
                    return Err(missing("index_prefix"));
                }
                if *request_timeout_ms == 0 {
                    return Err(ValidationError::ZeroValue("sink.request_timeout_ms"));
                }
                retry.validate()
            }
        }
    }
}

fn default_table_prefix() -> String {
    "event_log".to_owned()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}
