use clickhouse::sql::Identifier;
use clickhouse::{Client, Row};
use logship_config::SerializableSecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ErrorKind, ExportError, ExportResult};
use crate::sink::Sink;
use crate::types::{Checkpoint, ExportRecord};
use crate::utils::retry::{RetryPolicy, retry_with_backoff};

/// Name of the table created in every tenant database.
const EVENT_LOG_TABLE: &str = "event_log";

#[derive(Row, Serialize)]
struct EventLogRow<'a> {
    file_name: &'a str,
    file_offset: u64,
    /// Milliseconds since the epoch, stored as `DateTime64(3, 'UTC')`.
    event_time: i64,
    payload: &'a str,
}

#[derive(Row, Deserialize)]
struct PositionRow {
    file_name: String,
    file_offset: u64,
}

/// Connection parameters of a [`ClickHouseSink`].
#[derive(Debug, Clone)]
pub struct ClickHouseSinkOptions {
    pub url: String,
    pub username: String,
    pub password: Option<SerializableSecretString>,
    /// Tenant database, created when missing.
    pub database: String,
    pub retry: RetryPolicy,
}

/// Columnar sink writing one ClickHouse database per tenant.
///
/// Inserts are not transactional. The table is a `ReplacingMergeTree` keyed on
/// `(file_name, file_offset)`, so a batch redelivered after a crash collapses into the rows
/// already stored, and the checkpoint is the greatest ingested position.
#[derive(Clone)]
pub struct ClickHouseSink {
    client: Client,
    database: String,
    retry: RetryPolicy,
}

/// ClickHouse errors worth retrying.
pub fn is_transient(err: &ExportError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::SinkConnectionFailed | ErrorKind::SinkIoError | ErrorKind::SinkTimeout
    )
}

impl ClickHouseSink {
    /// Creates the tenant database and table when missing.
    pub async fn connect(options: ClickHouseSinkOptions) -> ExportResult<Self> {
        let mut client = Client::default()
            .with_url(&options.url)
            .with_user(&options.username);
        if let Some(password) = &options.password {
            client = client.with_password(password.expose());
        }

        client
            .query("CREATE DATABASE IF NOT EXISTS ?")
            .bind(Identifier(&options.database))
            .execute()
            .await?;

        let client = client.with_database(&options.database);
        client
            .query(
                "CREATE TABLE IF NOT EXISTS ? (
                    file_name String,
                    file_offset UInt64,
                    event_time DateTime64(3, 'UTC'),
                    payload String
                ) ENGINE = ReplacingMergeTree ORDER BY (file_name, file_offset)",
            )
            .bind(Identifier(EVENT_LOG_TABLE))
            .execute()
            .await?;

        info!(database = %options.database, "clickhouse sink ready");

        Ok(Self {
            client,
            database: options.database,
            retry: options.retry,
        })
    }

    async fn try_read_position(&self) -> ExportResult<Option<Checkpoint>> {
        let row = self
            .client
            .query("SELECT ?fields FROM ? ORDER BY file_name DESC, file_offset DESC LIMIT 1")
            .bind(Identifier(EVENT_LOG_TABLE))
            .fetch_optional::<PositionRow>()
            .await?;

        Ok(row.map(|row| Checkpoint::new(row.file_name, row.file_offset)))
    }

    async fn try_write_batch(&self, records: &[ExportRecord]) -> ExportResult<()> {
        let mut insert = self.client.insert(EVENT_LOG_TABLE)?;
        for record in records {
            insert
                .write(&EventLogRow {
                    file_name: &record.file_name,
                    file_offset: record.file_offset,
                    event_time: record.event_time.timestamp_millis(),
                    payload: &record.payload,
                })
                .await?;
        }
        insert.end().await?;

        Ok(())
    }
}

impl Sink for ClickHouseSink {
    async fn read_position(&self) -> ExportResult<Option<Checkpoint>> {
        retry_with_backoff(&self.retry, is_transient, || self.try_read_position()).await
    }

    async fn write_batch(
        &self,
        records: Vec<ExportRecord>,
        checkpoint: Checkpoint,
    ) -> ExportResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        debug!(
            database = %self.database,
            %checkpoint,
            records = records.len(),
            "writing batch to clickhouse"
        );
        retry_with_backoff(&self.retry, is_transient, || self.try_write_batch(&records)).await
    }
}
