use serde::Deserialize;

use crate::broker::OverflowPolicy;

/// Top-level configuration: where to listen and how the broker queues.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
}

/// Listener addresses and the optional API key guarding both surfaces.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    /// Control-plane (HTTP) port.
    pub http_port: u16,
    /// Pub/sub (WebSocket) port.
    pub ws_port: u16,
    /// When set, required as `x-api-key` on HTTP and `apiKey` on upgrade.
    pub api_key: Option<String>,
}

/// Broker-wide queueing knobs; applied to every topic and subscriber.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub replay_capacity: usize,
    pub heartbeat_secs: u64,
}

impl ServerSettings {
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.host, self.ws_port)
    }
}

/// Settings as they arrive from file or environment sources, every field
/// optional so partial sources merge over [`Settings::default`].
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub http_port: Option<u16>,
    pub ws_port: Option<u16>,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub queue_capacity: Option<usize>,
    pub overflow_policy: Option<OverflowPolicy>,
    pub replay_capacity: Option<usize>,
    pub heartbeat_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                http_port: 3000,
                ws_port: 3001,
                api_key: None,
            },
            broker: BrokerSettings {
                queue_capacity: 100,
                overflow_policy: OverflowPolicy::Disconnect,
                replay_capacity: 100,
                heartbeat_secs: 30,
            },
        }
    }
}
