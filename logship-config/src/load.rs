use serde::de::DeserializeOwned;

use crate::environment::Environment;

/// Directory holding the YAML configuration files, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

const BASE_CONFIG_FILE: &str = "base.yaml";

const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested keys, e.g. `APP_CLUSTER__DIRECTORY` sets `cluster.directory`.
const ENV_SEPARATOR: &str = "__";

/// Separator for list values, e.g. `APP_CLUSTER__INCLUDE=acc_*,hr`.
const LIST_SEPARATOR: &str = ",";

/// Marks configuration roots that can be loaded with [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are split on `,` into lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Loads layered configuration.
///
/// Sources, later ones overriding earlier ones:
/// 1. `configuration/base.yaml`
/// 2. `configuration/{environment}.yaml`, where the environment comes from `APP_ENVIRONMENT`
/// 3. `APP_` prefixed environment variables
pub fn load_config<T>() -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir()
        .map_err(|err| config::ConfigError::Message(format!("cannot resolve current directory: {err}")))?;
    let environment =
        Environment::load().map_err(|err| config::ConfigError::Message(err.to_string()))?;

    load_config_from(&base_path.join(CONFIGURATION_DIR), environment)
}

/// Loads layered configuration from an explicit directory and environment.
pub fn load_config_from<T>(
    configuration_directory: &std::path::Path,
    environment: Environment,
) -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let environment_filename = format!("{environment}.yaml");

    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if !<T as Config>::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source
            .try_parsing(true)
            .list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join(BASE_CONFIG_FILE),
        ))
        // The overlay is optional so a bare `base.yaml` is enough for local runs.
        .add_source(
            config::File::from(configuration_directory.join(environment_filename))
                .required(false),
        )
        .add_source(environment_source)
        .build()?;

    settings.try_deserialize::<T>()
}
