use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::forwarder::DEFAULT_MIN_INTERVAL;

pub const DEFAULT_TOPIC: &str = "esp32/health";
pub const DEFAULT_METRICS_URL: &str = "https://api.thingspeak.com/update";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub credentials: Option<(String, String)>,
    pub topic: String,
    pub keep_alive: Duration,
    /// TLS is enabled when a CA bundle is configured.
    pub ca_path: Option<PathBuf>,
    pub client_auth: Option<(PathBuf, PathBuf)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub url: String,
    pub path: String,
    pub auth: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSettings {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub mqtt: MqttSettings,
    pub store: StoreSettings,
    pub metrics: MetricsSettings,
    pub min_forward_interval: Duration,
    pub sink_timeout: Duration,
    pub http_host: String,
    pub http_port: u16,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let default_host = env.read("MQTT_HOST", "localhost");
        let default_port = env.read_parsed("MQTT_PORT", 1883u16);
        let (host, port) = match env.optional("MQTT_URL") {
            Some(raw) => match Url::parse(&raw) {
                Ok(u) => {
                    let host = u.host_str().unwrap_or(&default_host).to_string();
                    let port = u.port().unwrap_or(default_port);
                    (host, port)
                }
                Err(e) => {
                    tracing::warn!(
                        "MQTT_URL parse error: {e}; falling back to {}:{}",
                        default_host,
                        default_port
                    );
                    (default_host, default_port)
                }
            },
            None => (default_host, default_port),
        };

        let credentials = match (env.optional("MQTT_USERNAME"), env.optional("MQTT_PASSWORD")) {
            (Some(user), Some(pass)) => Some((user, pass)),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    key: "MQTT_USERNAME",
                    reason: "MQTT_USERNAME and MQTT_PASSWORD must be set together".into(),
                });
            }
        };

        let client_auth = match (env.optional("MQTT_CERT_PATH"), env.optional("MQTT_KEY_PATH")) {
            (Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    "MQTT client certificate/key not fully specified; proceeding without client auth"
                );
                None
            }
        };

        let mqtt = MqttSettings {
            host,
            port,
            client_id: env.read("MQTT_CLIENT_ID", "health-relay"),
            credentials,
            topic: env.read("MQTT_TOPIC", DEFAULT_TOPIC),
            keep_alive: Duration::from_secs(env.read_parsed("MQTT_KEEP_ALIVE_SECS", 30u64)),
            ca_path: env.optional("MQTT_CA_PATH").map(PathBuf::from),
            client_auth,
        };

        let store_url = env
            .optional("STATE_STORE_URL")
            .ok_or(ConfigError::Missing("STATE_STORE_URL"))?;
        Url::parse(&store_url).map_err(|e| ConfigError::Invalid {
            key: "STATE_STORE_URL",
            reason: e.to_string(),
        })?;
        let store = StoreSettings {
            url: store_url,
            path: env.read("STATE_STORE_PATH", "/"),
            auth: env.optional("STATE_STORE_AUTH"),
        };

        let metrics_url = env.read("METRICS_URL", DEFAULT_METRICS_URL);
        Url::parse(&metrics_url).map_err(|e| ConfigError::Invalid {
            key: "METRICS_URL",
            reason: e.to_string(),
        })?;
        let metrics = MetricsSettings {
            url: metrics_url,
            api_key: env
                .optional("METRICS_API_KEY")
                .ok_or(ConfigError::Missing("METRICS_API_KEY"))?,
        };

        let min_forward_interval = Duration::from_millis(env.read_parsed(
            "FORWARD_MIN_INTERVAL_MS",
            DEFAULT_MIN_INTERVAL.as_millis() as u64,
        ));
        let sink_timeout = Duration::from_millis(env.read_parsed("SINK_TIMEOUT_MS", 5_000u64));
        if sink_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "SINK_TIMEOUT_MS",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            mqtt,
            store,
            metrics,
            min_forward_interval,
            sink_timeout,
            http_host: env.read("HEALTH_RELAY_HOST", "0.0.0.0"),
            http_port: env.read_parsed("HEALTH_RELAY_PORT", 8082u16),
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn read(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn read_parsed<T>(&self, key: &str, default: T) -> T
    where
        T: std::str::FromStr + std::fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!("{key}={raw} is not valid; using {default}");
                default
            }),
            None => default,
        }
    }
}
