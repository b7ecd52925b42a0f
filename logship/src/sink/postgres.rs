use chrono::{DateTime, Utc};
use logship_config::SerializableSecretString;
use pg_escape::quote_identifier;
use tokio::sync::Mutex;
use tokio_postgres::{Client, Config, NoTls};
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{ErrorKind, ExportError, ExportResult};
use crate::sink::Sink;
use crate::types::{Checkpoint, ExportRecord};
use crate::utils::retry::{RetryPolicy, retry_with_backoff};

/// Connection parameters of a [`PostgresSink`].
#[derive(Debug, Clone)]
pub struct PostgresSinkOptions {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Option<SerializableSecretString>,
    /// Unquoted name of the tenant table.
    pub table: String,
    pub retry: RetryPolicy,
}

impl PostgresSinkOptions {
    fn connect_config(&self) -> Config {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .user(&self.username)
            .application_name("logship");

        if let Some(password) = &self.password {
            config.password(password.expose());
        }

        config
    }
}

/// Relational sink writing one table per tenant.
///
/// Every batch is inserted in a single transaction and duplicates are ignored on the
/// `(file_name, file_offset)` primary key. The checkpoint is the greatest position stored in the
/// table, so it commits atomically with the rows.
#[derive(Debug)]
pub struct PostgresSink {
    options: PostgresSinkOptions,
    quoted_table: String,
    client: Mutex<Option<Client>>,
}

/// Postgres errors worth retrying.
pub fn is_transient(err: &ExportError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::SinkConnectionFailed | ErrorKind::SinkIoError | ErrorKind::SinkTimeout
    )
}

impl PostgresSink {
    /// Connects and creates the tenant table when missing.
    pub async fn connect(options: PostgresSinkOptions) -> ExportResult<Self> {
        let quoted_table = quote_identifier(&options.table).into_owned();
        let client = open_client(&options).await?;

        client
            .batch_execute(&format!(
                "create table if not exists {quoted_table} (
                    file_name text not null,
                    file_offset bigint not null,
                    event_time timestamptz not null,
                    payload text not null,
                    primary key (file_name, file_offset)
                )"
            ))
            .await?;

        info!(table = %options.table, "postgres sink ready");

        Ok(Self {
            options,
            quoted_table,
            client: Mutex::new(Some(client)),
        })
    }

    async fn try_read_position(&self) -> ExportResult<Option<Checkpoint>> {
        let mut guard = self.client.lock().await;
        let client = ensure_client(&mut guard, &self.options).await?;

        let row = client
            .query_opt(
                &format!(
                    "select file_name, file_offset from {} \
                     order by file_name desc, file_offset desc limit 1",
                    self.quoted_table
                ),
                &[],
            )
            .await?;

        Ok(row.map(|row| {
            let file_name: String = row.get(0);
            let file_offset: i64 = row.get(1);
            Checkpoint::new(file_name, file_offset.max(0) as u64)
        }))
    }

    async fn try_write_batch(&self, records: &[ExportRecord]) -> ExportResult<()> {
        let mut file_names = Vec::with_capacity(records.len());
        let mut file_offsets = Vec::with_capacity(records.len());
        let mut event_times: Vec<DateTime<Utc>> = Vec::with_capacity(records.len());
        let mut payloads = Vec::with_capacity(records.len());
        for record in records {
            file_names.push(record.file_name.as_str());
            file_offsets.push(record.file_offset as i64);
            event_times.push(record.event_time);
            payloads.push(record.payload.as_str());
        }

        let mut guard = self.client.lock().await;
        let client = ensure_client(&mut guard, &self.options).await?;

        let result = async {
            let transaction = client.transaction().await?;
            let inserted = transaction
                .execute(
                    &format!(
                        "insert into {} (file_name, file_offset, event_time, payload) \
                         select * from unnest($1::text[], $2::int8[], $3::timestamptz[], $4::text[]) \
                         on conflict (file_name, file_offset) do nothing",
                        self.quoted_table
                    ),
                    &[&file_names, &file_offsets, &event_times, &payloads],
                )
                .await?;
            transaction.commit().await?;

            Ok::<_, ExportError>(inserted)
        }
        .await;

        match result {
            Ok(inserted) => {
                debug!(
                    table = %self.options.table,
                    records = records.len(),
                    inserted,
                    "batch committed"
                );
                Ok(())
            }
            Err(err) => {
                // A broken connection is replaced on the next attempt.
                if client.is_closed() {
                    *guard = None;
                }
                Err(err)
            }
        }
    }
}

impl Sink for PostgresSink {
    async fn read_position(&self) -> ExportResult<Option<Checkpoint>> {
        retry_with_backoff(&self.options.retry, is_transient, || self.try_read_position()).await
    }

    async fn write_batch(
        &self,
        records: Vec<ExportRecord>,
        checkpoint: Checkpoint,
    ) -> ExportResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        debug!(%checkpoint, records = records.len(), "writing batch to postgres");
        retry_with_backoff(&self.options.retry, is_transient, || {
            self.try_write_batch(&records)
        })
        .await
    }
}

async fn open_client(options: &PostgresSinkOptions) -> ExportResult<Client> {
    let (client, connection) = options.connect_config().connect(NoTls).await?;

    let span = tracing::Span::current();
    tokio::spawn(
        async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres sink connection failed");
            }
        }
        .instrument(span),
    );

    Ok(client)
}

async fn ensure_client<'a>(
    guard: &'a mut Option<Client>,
    options: &PostgresSinkOptions,
) -> ExportResult<&'a mut Client> {
    if guard.as_ref().is_none_or(Client::is_closed) {
        warn!(host = %options.host, "reconnecting postgres sink");
        *guard = Some(open_client(options).await?);
    }

    match guard.as_mut() {
        Some(client) => Ok(client),
        None => Err(ExportError::from((
            ErrorKind::SinkConnectionFailed,
            "Postgres client unavailable",
        ))),
    }
}
