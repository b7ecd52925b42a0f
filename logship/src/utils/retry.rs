use std::future::Future;
use std::time::Duration;

use logship_config::shared::RetryConfig;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::error::{ErrorKind, ExportError, ExportResult};
use crate::export_error;

/// Numeric retry policy of a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Wall time budget covering every attempt and every sleep.
    pub max_total: Duration,
}

impl RetryPolicy {
    /// Delay slept after the failed attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;

        Duration::from_millis(delay_ms.min(max_ms) as u64)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: f64::from(config.backoff_factor),
            max_total: Duration::from_millis(config.max_total_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error or the policy is exhausted.
///
/// `is_transient` decides which errors are retried. Every attempt is cut short when the time
/// budget runs out, so the whole call never outlives `max_total`. When the attempts or the
/// budget run out, the last error is returned wrapped in an [`ErrorKind::RetriesExhausted`]
/// error.
pub async fn retry_with_backoff<T, F, Fut, C>(
    policy: &RetryPolicy,
    is_transient: C,
    mut op: F,
) -> ExportResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExportResult<T>>,
    C: Fn(&ExportError) -> bool,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let budget_left = policy.max_total.saturating_sub(started.elapsed());
        let err = match tokio::time::timeout(budget_left, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if !is_transient(&err) => return Err(err),
            Ok(Err(err)) => err,
            Err(_) => {
                let err = export_error!(
                    ErrorKind::SinkTimeout,
                    "Attempt outlived the retry time budget",
                    format!("budget of {} ms", policy.max_total.as_millis())
                );
                return Err(exhausted(policy, attempt, started, err));
            }
        };

        let delay = policy.delay_for_attempt(attempt);
        let budget_left = policy.max_total.saturating_sub(started.elapsed());
        if attempt >= policy.max_attempts || delay > budget_left {
            return Err(exhausted(policy, attempt, started, err));
        }

        warn!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

fn exhausted(
    policy: &RetryPolicy,
    attempt: u32,
    started: Instant,
    err: ExportError,
) -> ExportError {
    error!(
        attempt,
        max_attempts = policy.max_attempts,
        elapsed_ms = started.elapsed().as_millis() as u64,
        error = %err,
        "giving up on transient failure"
    );

    ExportError::many(vec![
        export_error!(
            ErrorKind::RetriesExhausted,
            "Retries exhausted",
            format!("gave up after {attempt} attempt(s)")
        ),
        err,
    ])
}
