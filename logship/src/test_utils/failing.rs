use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{ErrorKind, ExportError, ExportResult};
use crate::export_error;
use crate::sink::Sink;
use crate::types::{Checkpoint, ExportRecord};
use crate::utils::retry::{RetryPolicy, retry_with_backoff};

#[derive(Debug, Clone, Copy)]
enum Script {
    Succeed,
    FailNext { remaining: usize, kind: ErrorKind },
    FailAlways { kind: ErrorKind },
    FailAfter { successes: usize, kind: ErrorKind },
}

/// Sink wrapper failing writes on demand.
///
/// Writes go through [`retry_with_backoff`] like the real backends, so scripted transient
/// failures exercise the retry policy and [`FailingSink::write_attempts`] counts every try.
#[derive(Clone)]
pub struct FailingSink<S> {
    wrapped_sink: S,
    script: Arc<Mutex<Script>>,
    retry: Arc<Mutex<RetryPolicy>>,
    write_attempts: Arc<AtomicUsize>,
}

/// Kinds the scripted sink retries.
pub fn is_transient(err: &ExportError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::SinkConnectionFailed | ErrorKind::SinkIoError | ErrorKind::SinkTimeout
    )
}

impl<S> FailingSink<S> {
    pub fn wrap(sink: S) -> Self {
        Self {
            wrapped_sink: sink,
            script: Arc::new(Mutex::new(Script::Succeed)),
            retry: Arc::new(Mutex::new(RetryPolicy::default())),
            write_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_retry_policy(&self, policy: RetryPolicy) {
        *self.retry.lock().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Fails the next `count` write attempts with `kind`.
    pub fn fail_next_writes(&self, count: usize, kind: ErrorKind) {
        self.set_script(Script::FailNext {
            remaining: count,
            kind,
        });
    }

    /// Lets `successes` write attempts through, then fails every attempt with `kind`.
    pub fn fail_writes_after(&self, successes: usize, kind: ErrorKind) {
        self.set_script(Script::FailAfter { successes, kind });
    }

    /// Fails every write attempt with `kind` until [`FailingSink::heal`] is called.
    pub fn fail_all_writes(&self, kind: ErrorKind) {
        self.set_script(Script::FailAlways { kind });
    }

    pub fn heal(&self) {
        self.set_script(Script::Succeed);
    }

    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    pub fn wrapped(&self) -> &S {
        &self.wrapped_sink
    }

    fn set_script(&self, script: Script) {
        *self.script.lock().unwrap_or_else(PoisonError::into_inner) = script;
    }

    /// Consumes one step of the script, returning the error to fail with, if any.
    fn next_failure(&self) -> Option<ErrorKind> {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        match *script {
            Script::Succeed => None,
            Script::FailAlways { kind } => Some(kind),
            Script::FailAfter { successes: 0, kind } => {
                *script = Script::FailAlways { kind };
                Some(kind)
            }
            Script::FailAfter { successes, kind } => {
                *script = Script::FailAfter {
                    successes: successes - 1,
                    kind,
                };
                None
            }
            Script::FailNext { remaining, kind } => {
                *script = if remaining <= 1 {
                    Script::Succeed
                } else {
                    Script::FailNext {
                        remaining: remaining - 1,
                        kind,
                    }
                };
                (remaining > 0).then_some(kind)
            }
        }
    }
}

impl<S> FailingSink<S>
where
    S: Sink + Send + Sync,
{
    async fn try_write_batch(
        &self,
        records: &[ExportRecord],
        checkpoint: &Checkpoint,
    ) -> ExportResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(kind) = self.next_failure() {
            return Err(export_error!(
                kind,
                "Scripted sink failure",
                format!("batch ending at {checkpoint}")
            ));
        }

        self.wrapped_sink
            .write_batch(records.to_vec(), checkpoint.clone())
            .await
    }
}

impl<S> Sink for FailingSink<S>
where
    S: Sink + Send + Sync,
{
    async fn read_position(&self) -> ExportResult<Option<Checkpoint>> {
        self.wrapped_sink.read_position().await
    }

    async fn write_batch(
        &self,
        records: Vec<ExportRecord>,
        checkpoint: Checkpoint,
    ) -> ExportResult<()> {
        let policy = self
            .retry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        retry_with_backoff(&policy, is_transient, || {
            self.try_write_batch(&records, &checkpoint)
        })
        .await
    }
}
