//! The `config` module holds the client options and loads the `bayeux`
//! binary's settings from `config/default.*` and `BAYEUX__*` environment
//! variables, falling back to defaults for anything left unset.

mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{ClientOptions, PartialClientOptions, Settings, TlsOptions};

/// Loads the configuration from the default file and environment variables.
///
/// Nested keys use a double underscore, e.g. `BAYEUX__CLIENT__TIMEOUT=30`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("BAYEUX")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("client.connectiontypes")
                .with_list_parse_key("client.disabled")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();

    let client = partial
        .client
        .unwrap_or_default()
        .merge_into(default.client);
    client
        .validate()
        .map_err(|e| ConfigError::Message(e.to_string()))?;

    Ok(Settings {
        endpoint: partial.endpoint.unwrap_or(default.endpoint),
        log_level: partial.log_level.unwrap_or(default.log_level),
        client,
    })
}
