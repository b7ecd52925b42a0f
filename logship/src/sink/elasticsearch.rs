use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryStreamExt, stream};
use logship_config::SerializableSecretString;
use logship_config::shared::IndexBucketing;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ExportError, ExportResult};
use crate::sink::Sink;
use crate::types::{Checkpoint, ExportRecord};
use crate::utils::retry::{RetryPolicy, retry_with_backoff};
use crate::{bail, export_error};

/// Id of the document holding the checkpoint in the checkpoint index.
const CHECKPOINT_DOCUMENT_ID: &str = "position";

/// Connection parameters of an [`ElasticsearchSink`].
#[derive(Debug, Clone)]
pub struct ElasticsearchSinkOptions {
    pub urls: Vec<String>,
    pub index_prefix: String,
    pub database: String,
    pub bucketing: IndexBucketing,
    pub username: Option<String>,
    pub password: Option<SerializableSecretString>,
    pub request_timeout: Duration,
    /// Upper bound of concurrent bulk requests for one batch.
    pub writing_parallelism: usize,
    pub retry: RetryPolicy,
}

#[derive(Serialize)]
struct EventDocument<'a> {
    file_name: &'a str,
    file_offset: u64,
    event_time: DateTime<Utc>,
    payload: &'a str,
}

#[derive(Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<BTreeMap<String, BulkItem>>,
}

#[derive(Deserialize)]
struct BulkItem {
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct GetResponse {
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Checkpoint>,
}

/// Returns the index a record with timestamp `event_time` is written to.
///
/// The name is `<prefix>-<database>` followed by a suffix derived from the UTC timestamp:
/// `-YYYYMMDDHH` for hourly, `-YYYYMMDD` for daily and `-YYYYMM` for monthly bucketing.
pub fn index_target(
    prefix: &str,
    database: &str,
    bucketing: IndexBucketing,
    event_time: DateTime<Utc>,
) -> String {
    let base = format!("{prefix}-{database}").to_lowercase();

    match bucketing {
        IndexBucketing::Hour => format!("{base}-{}", event_time.format("%Y%m%d%H")),
        IndexBucketing::Day => format!("{base}-{}", event_time.format("%Y%m%d")),
        IndexBucketing::Month => format!("{base}-{}", event_time.format("%Y%m")),
        IndexBucketing::None => base,
    }
}

/// Elasticsearch errors worth retrying.
pub fn is_transient(err: &ExportError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::SinkConnectionFailed | ErrorKind::SinkIoError | ErrorKind::SinkTimeout
    )
}

/// Search index sink.
///
/// Every record is indexed under the id `<file>:<offset>`, so re-indexing a batch after a crash
/// overwrites the same documents. A batch fans out into one bulk request per index target. The
/// checkpoint lives in a dedicated `<prefix>-<database>-checkpoint` index and is only written
/// once every bulk request of the batch succeeded.
pub struct ElasticsearchSink {
    client: Client,
    options: ElasticsearchSinkOptions,
    checkpoint_index: String,
    next_host: AtomicUsize,
}

impl ElasticsearchSink {
    pub fn new(mut options: ElasticsearchSinkOptions) -> ExportResult<Self> {
        if options.urls.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "Elasticsearch sink needs at least one url"
            );
        }
        for url in &mut options.urls {
            let trimmed = url.trim_end_matches('/').len();
            url.truncate(trimmed);
        }
        options.writing_parallelism = options.writing_parallelism.max(1);

        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| {
                export_error!(
                    ErrorKind::ConfigError,
                    "Failed to build the HTTP client",
                    err
                )
            })?;
        let checkpoint_index = format!("{}-{}-checkpoint", options.index_prefix, options.database)
            .to_lowercase();

        info!(
            hosts = options.urls.len(),
            index_prefix = %options.index_prefix,
            bucketing = ?options.bucketing,
            "elasticsearch sink ready"
        );

        Ok(Self {
            client,
            options,
            checkpoint_index,
            next_host: AtomicUsize::new(0),
        })
    }

    /// Picks the next host, round robin.
    fn host(&self) -> &str {
        let index = self.next_host.fetch_add(1, Ordering::Relaxed) % self.options.urls.len();
        &self.options.urls[index]
    }

    fn authenticate(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.options.username {
            Some(username) => request.basic_auth(
                username,
                self.options.password.as_ref().map(|p| p.expose().to_owned()),
            ),
            None => request,
        }
    }

    /// Builds the NDJSON bulk bodies of a batch, one per index target.
    fn bulk_bodies(&self, records: &[ExportRecord]) -> ExportResult<Vec<(String, String)>> {
        let mut bodies: BTreeMap<String, String> = BTreeMap::new();

        for record in records {
            let index = index_target(
                &self.options.index_prefix,
                &self.options.database,
                self.options.bucketing,
                record.event_time,
            );
            let action = serde_json::json!({
                "index": {
                    "_index": index,
                    "_id": format!("{}:{}", record.file_name, record.file_offset),
                }
            });
            let document = EventDocument {
                file_name: &record.file_name,
                file_offset: record.file_offset,
                event_time: record.event_time,
                payload: &record.payload,
            };

            let body = bodies.entry(index).or_default();
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&document)?);
            body.push('\n');
        }

        Ok(bodies.into_iter().collect())
    }

    async fn send_bulk(&self, index: &str, body: String) -> ExportResult<()> {
        let url = format!("{}/_bulk", self.host());
        let response = self
            .authenticate(self.client.post(url))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let response: BulkResponse = response.json().await?;
        if !response.errors {
            return Ok(());
        }

        let failed: Vec<&BulkItem> = response
            .items
            .iter()
            .flat_map(|item| item.values())
            .filter(|item| item.status >= 300)
            .collect();
        let detail = failed
            .iter()
            .find_map(|item| item.error.as_ref())
            .map(|err| err.to_string())
            .unwrap_or_default();

        warn!(index, failed = failed.len(), "bulk request partially failed");

        let all_transient = failed
            .iter()
            .all(|item| is_transient_status(item.status));
        if all_transient {
            bail!(
                ErrorKind::SinkIoError,
                "Elasticsearch rejected documents under load",
                detail
            );
        }

        bail!(
            ErrorKind::SinkSchemaError,
            "Elasticsearch rejected documents",
            detail
        )
    }

    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> ExportResult<()> {
        let url = format!(
            "{}/{}/_doc/{CHECKPOINT_DOCUMENT_ID}?refresh=true",
            self.host(),
            self.checkpoint_index
        );
        let response = self
            .authenticate(self.client.put(url))
            .json(checkpoint)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        Ok(())
    }

    async fn try_read_position(&self) -> ExportResult<Option<Checkpoint>> {
        let url = format!(
            "{}/{}/_doc/{CHECKPOINT_DOCUMENT_ID}",
            self.host(),
            self.checkpoint_index
        );
        let response = self.authenticate(self.client.get(url)).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let response: GetResponse = response.json().await?;
        Ok(response.found.then_some(response.source).flatten())
    }

    async fn try_write_batch(
        &self,
        bodies: &[(String, String)],
        checkpoint: &Checkpoint,
    ) -> ExportResult<()> {
        let requests: Vec<BoxFuture<'_, ExportResult<()>>> = bodies
            .iter()
            .map(|(index, body)| self.send_bulk(index, body.clone()).boxed())
            .collect();

        stream::iter(requests)
            .buffer_unordered(self.options.writing_parallelism)
            .try_collect::<Vec<()>>()
            .await?;

        self.write_checkpoint(checkpoint).await
    }
}

impl Sink for ElasticsearchSink {
    async fn read_position(&self) -> ExportResult<Option<Checkpoint>> {
        retry_with_backoff(&self.options.retry, is_transient, || {
            self.try_read_position()
        })
        .await
    }

    async fn write_batch(
        &self,
        records: Vec<ExportRecord>,
        checkpoint: Checkpoint,
    ) -> ExportResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let bodies = self.bulk_bodies(&records)?;
        debug!(
            %checkpoint,
            records = records.len(),
            targets = bodies.len(),
            "writing batch to elasticsearch"
        );

        retry_with_backoff(&self.options.retry, is_transient, || {
            self.try_write_batch(&bodies, &checkpoint)
        })
        .await
    }
}

fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

fn status_error(status: StatusCode, body: String) -> ExportError {
    let detail = format!("{status}: {body}");

    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        export_error!(ErrorKind::SinkTimeout, "Elasticsearch request timed out", detail)
    } else if is_transient_status(status.as_u16()) {
        export_error!(
            ErrorKind::SinkConnectionFailed,
            "Elasticsearch is unavailable",
            detail
        )
    } else if status == StatusCode::BAD_REQUEST {
        export_error!(
            ErrorKind::SinkSchemaError,
            "Elasticsearch rejected the request",
            detail
        )
    } else {
        export_error!(
            ErrorKind::SinkQueryFailed,
            "Elasticsearch request failed",
            detail
        )
    }
}
