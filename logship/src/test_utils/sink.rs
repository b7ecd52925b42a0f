use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, RwLock};

use crate::error::ExportResult;
use crate::pipeline::PipelineSettings;
use crate::sink::Sink;
use crate::sink::factory::SinkFactory;
use crate::sink::memory::MemorySink;
use crate::test_utils::failing::FailingSink;
use crate::test_utils::notify::Conditions;
use crate::types::{Checkpoint, ExportRecord, TenantDescriptor, TenantId};

/// What a [`TestSinkWrapper`] observed so far.
#[derive(Debug, Clone, Default)]
pub struct SinkHistory {
    /// Records of every acknowledged batch, in commit order.
    pub records: Vec<ExportRecord>,
    /// Checkpoint of every acknowledged batch, in commit order.
    pub checkpoints: Vec<Checkpoint>,
    /// Positions returned by `read_position`.
    pub positions_read: Vec<Option<Checkpoint>>,
    pub failed_writes: usize,
}

struct Inner<S> {
    wrapped_sink: S,
    history: SinkHistory,
    conditions: Conditions<SinkHistory>,
}

/// A test wrapper that records what passes through any sink and lets tests wait for it.
pub struct TestSinkWrapper<S> {
    inner: Arc<RwLock<Inner<S>>>,
}

impl<S> Clone for TestSinkWrapper<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> TestSinkWrapper<S> {
    pub fn wrap(sink: S) -> Self {
        let inner = Inner {
            wrapped_sink: sink,
            history: SinkHistory::default(),
            conditions: Conditions::default(),
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    pub async fn history(&self) -> SinkHistory {
        self.inner.read().await.history.clone()
    }

    pub async fn records(&self) -> Vec<ExportRecord> {
        self.inner.read().await.history.records.clone()
    }

    pub async fn checkpoints(&self) -> Vec<Checkpoint> {
        self.inner.read().await.history.checkpoints.clone()
    }

    /// Returns a notify released once `condition` holds on the history.
    pub async fn notify_on<F>(&self, condition: F) -> Arc<Notify>
    where
        F: Fn(&SinkHistory) -> bool + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().await;
        let Inner {
            history,
            conditions,
            ..
        } = &mut *inner;

        conditions.register(history, condition)
    }

    /// Returns a notify released once at least `count` records were acknowledged.
    pub async fn wait_for_records(&self, count: usize) -> Arc<Notify> {
        self.notify_on(move |history| history.records.len() >= count)
            .await
    }

    /// Returns a notify released once at least `count` writes failed.
    pub async fn wait_for_failed_writes(&self, count: usize) -> Arc<Notify> {
        self.notify_on(move |history| history.failed_writes >= count)
            .await
    }
}

impl<S: Clone> TestSinkWrapper<S> {
    pub async fn wrapped(&self) -> S {
        self.inner.read().await.wrapped_sink.clone()
    }
}

impl<S> Sink for TestSinkWrapper<S>
where
    S: Sink + Clone + Send + Sync,
{
    async fn read_position(&self) -> ExportResult<Option<Checkpoint>> {
        let sink = self.wrapped().await;
        let result = sink.read_position().await;

        if let Ok(position) = &result {
            let mut inner = self.inner.write().await;
            let Inner {
                history,
                conditions,
                ..
            } = &mut *inner;

            history.positions_read.push(position.clone());
            conditions.check(history);
        }

        result
    }

    async fn write_batch(
        &self,
        records: Vec<ExportRecord>,
        checkpoint: Checkpoint,
    ) -> ExportResult<()> {
        let sink = self.wrapped().await;
        let result = sink.write_batch(records.clone(), checkpoint.clone()).await;

        {
            let mut inner = self.inner.write().await;
            let Inner {
                history,
                conditions,
                ..
            } = &mut *inner;

            if result.is_ok() {
                history.records.extend(records);
                history.checkpoints.push(checkpoint);
            } else {
                history.failed_writes += 1;
            }

            conditions.check(history);
        }

        result
    }
}

/// Sink handed out by [`MemorySinkFactory`].
pub type TestTenantSink = TestSinkWrapper<FailingSink<MemorySink>>;

/// Hands out one in-memory sink per tenant and keeps it across restarts.
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    sinks: Arc<Mutex<HashMap<TenantId, TestTenantSink>>>,
    create_delay: Option<Duration>,
    created: Arc<AtomicUsize>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every sink creation, widening the window in which a start can race a stop.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Returns the sink of `id`, creating it on first use.
    pub fn sink(&self, id: TenantId) -> TestTenantSink {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_insert_with(|| TestSinkWrapper::wrap(FailingSink::wrap(MemorySink::new())))
            .clone()
    }

    /// Number of sinks handed to pipelines so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SinkFactory for MemorySinkFactory {
    type Sink = TestTenantSink;

    async fn create_sink(
        &self,
        tenant: &TenantDescriptor,
        _settings: &PipelineSettings,
    ) -> ExportResult<TestTenantSink> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        self.created.fetch_add(1, Ordering::SeqCst);

        Ok(self.sink(tenant.id))
    }
}
