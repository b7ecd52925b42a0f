use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Bounded exponential backoff applied to transient sink failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay_ms: u64,
    /// Upper bound of a single delay.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after every failed attempt.
    pub backoff_factor: f32,
    /// Wall time budget for all attempts of one write.
    pub max_total_ms: u64,
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::ZeroValue("retry.max_attempts"));
        }
        if self.backoff_factor < 1.0 {
            return Err(ValidationError::InvalidBackoffFactor(self.backoff_factor));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ValidationError::InvalidRetryDelays {
                initial: self.initial_delay_ms,
                max: self.max_delay_ms,
            });
        }

        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
            max_total_ms: 60_000,
        }
    }
}
