//! Configuration loading.
//!
//! Settings are layered: built-in defaults, then an optional file, then
//! environment variables prefixed with `PRIOSUB_` (nesting separated by `__`,
//! e.g. `PRIOSUB_BROKER__DELIVERY_BUFFER=16`).

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{BrokerSettings, LoggingSettings, ServerSettings, Settings};

/// Loads the configuration from `config/default` and environment variables,
/// merged over the default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(None)
}

/// Loads the configuration from `path` (or `config/default` when `None`)
/// and environment variables. An explicit path must exist.
pub fn load_config_from(path: Option<&str>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::with_name(path).required(true),
        None => File::with_name("config/default").required(false),
    };

    let builder = Config::builder().add_source(file).add_source(
        Environment::with_prefix("PRIOSUB")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
