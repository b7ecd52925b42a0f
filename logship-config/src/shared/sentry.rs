use serde::{Deserialize, Serialize};

/// Sentry error reporting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryConfig {
    /// Sentry DSN the exporter reports fatal errors and panics to.
    pub dsn: String,
}
