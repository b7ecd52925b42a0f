use logship_config::load_config;
use logship_config::shared::ExporterConfig;

/// Loads the [`ExporterConfig`] and validates it.
pub fn load_exporter_config() -> anyhow::Result<ExporterConfig> {
    let config = load_config::<ExporterConfig>()?;
    config.validate()?;

    Ok(config)
}
