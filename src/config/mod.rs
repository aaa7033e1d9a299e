mod settings;

use config::{Config, ConfigError, Environment, File};

use crate::config::settings::PartialSettings;

pub use settings::{BrokerSettings, ServerSettings, Settings};

/// Loads configuration from `config/default.toml` (optional) and
/// `RELAYPUB_`-prefixed environment variables (`RELAYPUB_SERVER__WS_PORT`
/// and friends), merged over built-in defaults.
///
/// Zero queue or replay capacities are rejected here so a bad deployment
/// fails at startup instead of at the first subscribe.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("relaypub")
                .prefix_separator("_")
                .separator("__"),
        );

    let config = builder.build()?;

    // Deserialize what is available, then fill the gaps with defaults.
    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    let merged = Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            http_port: partial
                .server
                .as_ref()
                .and_then(|s| s.http_port)
                .unwrap_or(default.server.http_port),
            ws_port: partial
                .server
                .as_ref()
                .and_then(|s| s.ws_port)
                .unwrap_or(default.server.ws_port),
            api_key: partial
                .server
                .as_ref()
                .and_then(|s| s.api_key.clone())
                .or(default.server.api_key),
        },
        broker: BrokerSettings {
            queue_capacity: partial
                .broker
                .as_ref()
                .and_then(|b| b.queue_capacity)
                .unwrap_or(default.broker.queue_capacity),
            overflow_policy: partial
                .broker
                .as_ref()
                .and_then(|b| b.overflow_policy)
                .unwrap_or(default.broker.overflow_policy),
            replay_capacity: partial
                .broker
                .as_ref()
                .and_then(|b| b.replay_capacity)
                .unwrap_or(default.broker.replay_capacity),
            heartbeat_secs: partial
                .broker
                .as_ref()
                .and_then(|b| b.heartbeat_secs)
                .unwrap_or(default.broker.heartbeat_secs),
        },
    };

    if merged.broker.queue_capacity < 1 {
        return Err(ConfigError::Message(
            "broker.queue_capacity must be >= 1".to_string(),
        ));
    }
    if merged.broker.replay_capacity < 1 {
        return Err(ConfigError::Message(
            "broker.replay_capacity must be >= 1".to_string(),
        ));
    }

    Ok(merged)
}

#[cfg(test)]
mod tests;
