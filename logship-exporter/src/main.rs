use std::error::Error;
use std::sync::Arc;

use logship_config::Environment;
use logship_config::shared::ExporterConfig;
use logship_telemetry::init_tracing;
use tracing::{error, info};

use crate::config::load_exporter_config;
use crate::core::start_exporter_with_config;

mod config;
mod core;

fn main() -> anyhow::Result<()> {
    // Configuration errors abort here, before any pipeline runs.
    let exporter_config = load_exporter_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    // Sentry hooks into panics, so it is set up before the runtime starts.
    let _sentry_guard = init_sentry(&exporter_config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(exporter_config))?;

    Ok(())
}

async fn async_main(exporter_config: ExporterConfig) -> anyhow::Result<()> {
    if let Err(err) = start_exporter_with_config(exporter_config).await {
        let source: &(dyn Error + 'static) = err.as_ref();
        sentry::capture_error(source);
        error!("the exporter stopped on a fatal error: {err:#}");

        return Err(err);
    }

    Ok(())
}

/// Initializes Sentry when a DSN is configured.
///
/// Panics are captured through the panic integration and events are tagged with the service
/// name.
fn init_sentry(config: &ExporterConfig) -> anyhow::Result<Option<sentry::ClientInitGuard>> {
    let Some(sentry_config) = &config.sentry else {
        info!("sentry not configured, skipping initialization");
        return Ok(None);
    };

    info!("initializing sentry with supplied dsn");

    let environment = Environment::load()?;
    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(sentry_config.dsn.parse()?),
        environment: Some(environment.to_string().into()),
        integrations: vec![Arc::new(
            sentry::integrations::panic::PanicIntegration::new(),
        )],
        ..Default::default()
    });

    sentry::configure_scope(|scope| {
        scope.set_tag("service", "logship-exporter");
    });

    Ok(Some(guard))
}
