use std::error;
use std::fmt;

/// Result type used across the exporter.
pub type ExportResult<T> = Result<T, ExportError>;

/// Main error type of the exporter.
///
/// An [`ExportError`] is either a single error, made of an [`ErrorKind`], a static description
/// and an optional dynamic detail, or an aggregation of several errors. Callers branch on
/// [`ExportError::kind`], never on the message.
#[derive(Debug, Clone)]
pub struct ExportError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    WithDescription(ErrorKind, &'static str),
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    Many(Vec<ExportError>),
}

/// Categories of failures.
///
/// The kind decides how a failure propagates: configuration errors abort the process, transient
/// sink errors are retried by the backend, log data errors stop only the affected pipeline.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration
    ConfigError,

    // Log source
    SourceUnavailable,
    MalformedLogData,

    // Sink connectivity, retried by the backends
    SinkConnectionFailed,
    SinkIoError,
    SinkTimeout,

    // Sink failures that are never retried
    SinkSchemaError,
    SinkQueryFailed,
    RetriesExhausted,

    // Topology
    TenantRemoved,

    // Workflow
    InvalidState,
    PipelinePanic,

    // IO & serialization
    IoError,
    SerializationError,
    DeserializationError,

    Unknown,
}

impl ExportError {
    /// Aggregates several errors into one.
    pub fn many(errors: Vec<ExportError>) -> ExportError {
        ExportError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the kind of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every kind contained in this error, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    /// Returns the first dynamic detail available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }
}

impl PartialEq for ExportError {
    fn eq(&self, other: &ExportError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => errors_a == errors_b,
            _ => false,
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => write!(f, "{kind:?}: {desc}"),
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                write!(f, "{kind:?}: {desc} -> {detail}")
            }
            ErrorRepr::Many(ref errors) => match errors.as_slice() {
                [] => write!(f, "Multiple errors occurred (empty)"),
                [error] => error.fmt(f),
                errors => {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                    Ok(())
                }
            },
        }
    }
}

impl error::Error for ExportError {}

impl From<(ErrorKind, &'static str)> for ExportError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> ExportError {
        ExportError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for ExportError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> ExportError {
        ExportError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

impl<E> From<Vec<E>> for ExportError
where
    E: Into<ExportError>,
{
    fn from(errors: Vec<E>) -> ExportError {
        ExportError::many(errors.into_iter().map(Into::into).collect())
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> ExportError {
        ExportError::from((ErrorKind::IoError, "I/O error occurred", err.to_string()))
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> ExportError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        ExportError::from((kind, description, err.to_string()))
    }
}

impl From<logship_config::shared::ValidationError> for ExportError {
    fn from(err: logship_config::shared::ValidationError) -> ExportError {
        ExportError::from((
            ErrorKind::ConfigError,
            "Invalid configuration",
            err.to_string(),
        ))
    }
}

/// Maps Postgres failures onto sink kinds using the SQLSTATE class.
///
/// Errors without a SQLSTATE come from the connection itself and are treated as connectivity
/// failures.
impl From<tokio_postgres::Error> for ExportError {
    fn from(err: tokio_postgres::Error) -> ExportError {
        let Some(sqlstate) = err.code() else {
            let kind = if err.is_closed() {
                ErrorKind::SinkConnectionFailed
            } else {
                ErrorKind::SinkIoError
            };
            return ExportError::from((kind, "Postgres client error", err.to_string()));
        };

        let (kind, description) = match sqlstate.code().get(..2) {
            // Connection exception, insufficient resources, operator intervention.
            Some("08" | "53" | "57") => (
                ErrorKind::SinkConnectionFailed,
                "Postgres connection failure",
            ),
            // Transaction rollback, e.g. serialization failures and deadlocks.
            Some("40") => (ErrorKind::SinkIoError, "Postgres transaction rolled back"),
            // Syntax error or access rule violation, undefined objects.
            Some("42") => (ErrorKind::SinkSchemaError, "Postgres schema mismatch"),
            _ => (ErrorKind::SinkQueryFailed, "Postgres query failed"),
        };

        ExportError::from((kind, description, err.to_string()))
    }
}

impl From<clickhouse::error::Error> for ExportError {
    fn from(err: clickhouse::error::Error) -> ExportError {
        use clickhouse::error::Error;

        let (kind, description) = match &err {
            Error::Network(_) => (ErrorKind::SinkConnectionFailed, "ClickHouse network error"),
            Error::TimedOut => (ErrorKind::SinkTimeout, "ClickHouse request timed out"),
            Error::BadResponse(_) => (ErrorKind::SinkQueryFailed, "ClickHouse rejected the query"),
            _ => (ErrorKind::SinkIoError, "ClickHouse client error"),
        };

        ExportError::from((kind, description, err.to_string()))
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(err: reqwest::Error) -> ExportError {
        let (kind, description) = if err.is_timeout() {
            (ErrorKind::SinkTimeout, "HTTP request timed out")
        } else if err.is_connect() {
            (ErrorKind::SinkConnectionFailed, "HTTP connection failed")
        } else if err.is_decode() {
            (
                ErrorKind::DeserializationError,
                "HTTP response body could not be decoded",
            )
        } else {
            (ErrorKind::SinkIoError, "HTTP request failed")
        };

        ExportError::from((kind, description, err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, export_error};

    #[test]
    fn simple_error_has_no_detail() {
        let err = ExportError::from((ErrorKind::SinkTimeout, "Bulk request timed out"));

        assert_eq!(err.kind(), ErrorKind::SinkTimeout);
        assert_eq!(err.detail(), None);
        assert_eq!(err.kinds(), vec![ErrorKind::SinkTimeout]);
    }

    #[test]
    fn aggregated_errors_report_the_first_kind() {
        let err = ExportError::many(vec![
            export_error!(ErrorKind::RetriesExhausted, "Gave up", "after 3 attempts"),
            export_error!(ErrorKind::SinkConnectionFailed, "Connection refused"),
        ]);

        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::RetriesExhausted, ErrorKind::SinkConnectionFailed]
        );
        assert_eq!(err.detail(), Some("after 3 attempts"));
    }

    #[test]
    fn empty_aggregation_is_unknown() {
        let err = ExportError::many(vec![]);

        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.kinds().is_empty());
    }

    #[test]
    fn display_includes_kind_description_and_detail() {
        let err = export_error!(
            ErrorKind::MalformedLogData,
            "Invalid record timestamp",
            "20231301000000"
        );

        assert_eq!(
            err.to_string(),
            "MalformedLogData: Invalid record timestamp -> 20231301000000"
        );
    }

    #[test]
    fn bail_returns_early() {
        fn check(value: usize) -> ExportResult<usize> {
            if value == 0 {
                bail!(ErrorKind::ConfigError, "Value cannot be zero");
            }
            Ok(value)
        }

        assert_eq!(check(0).unwrap_err().kind(), ErrorKind::ConfigError);
        assert_eq!(check(2).unwrap(), 2);
    }

    #[test]
    fn io_errors_convert_to_io_kind() {
        let err: ExportError = std::io::Error::other("disk gone").into();

        assert_eq!(err.kind(), ErrorKind::IoError);
        assert_eq!(err.detail(), Some("disk gone"));
    }
}
