//! Tracing setup shared by the exporter binary and the tests.
//!
//! Production-like environments write JSON lines to a daily rolling file, development
//! writes pretty output to the terminal. Both honor `RUST_LOG` and default to `info`.

use std::path::PathBuf;
use std::sync::Once;

use logship_config::Environment;
use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, InitError};
use tracing_log::LogTracer;
use tracing_log::log_tracer::SetLoggerError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber, Registry, fmt};

mod panic;

/// Overrides the directory of the production log files.
const LOG_DIR_ENV_NAME: &str = "LOGSHIP_LOG_DIR";

const DEFAULT_LOG_DIR: &str = "logs";

/// Rolled files kept on disk.
const MAX_LOG_FILES: usize = 5;

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),

    #[error("failed to read the environment: {0}")]
    Environment(#[from] std::io::Error),
}

/// Keeps buffered log lines alive until dropped at the end of `main`.
#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

static INIT_TEST_TRACING: Once = Once::new();

/// Enables terminal tracing in tests when `ENABLE_TRACING` is set:
///
/// ENABLE_TRACING=1 cargo test <test_name>
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var("ENABLE_TRACING").is_ok() {
            // Without an explicit environment the prod file writer would be picked.
            Environment::Dev.set();
            let _log_flusher =
                init_tracing("test").expect("failed to initialize tracing for tests");
        }
    });
}

/// Installs the global subscriber, the `log` bridge and the panic hook.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    LogTracer::init()?;

    let environment = Environment::load()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_flusher = if environment.is_prod() {
        init_file_tracing(filter, app_name)?
    } else {
        init_terminal_tracing(filter)?
    };

    panic::install();

    Ok(log_flusher)
}

fn log_dir() -> PathBuf {
    std::env::var_os(LOG_DIR_ENV_NAME)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
}

fn init_file_tracing(filter: EnvFilter, app_name: &str) -> Result<LogFlusher, TracingError> {
    let appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir())?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(false)
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer),
    );
    set_global_default(subscriber)?;

    Ok(LogFlusher::Flusher(guard))
}

fn init_terminal_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();
    set_global_default(subscriber)?;

    Ok(LogFlusher::NullFlusher)
}
