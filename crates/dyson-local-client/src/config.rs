//! Client configuration loaded from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::ExponentialOptions;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long to wait for CONNACK after opening the connection.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

impl ConnectionConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            port: default_port(),
            keep_alive_secs: default_keep_alive_secs(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

/// Backoff schedule for retrying `start()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default)]
    pub min_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl RetryConfig {
    pub fn options(&self) -> ExponentialOptions {
        ExponentialOptions {
            base: Duration::from_millis(self.base_ms),
            factor: self.factor,
            min: Duration::from_millis(self.min_ms),
            max: self.max_ms.map(Duration::from_millis),
            count: self.count,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            factor: default_factor(),
            min_ms: 0,
            max_ms: None,
            count: None,
        }
    }
}

/// Logging settings. `RUST_LOG` takes precedence when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_scheme() -> String {
    "mqtt".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_base_ms() -> u64 {
    1000
}

fn default_factor() -> f64 {
    2.0
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("port = 1883"));
        assert!(!toml_str.contains("max_ms"));
    }

    #[test]
    fn parse_example_config() {
        let toml_str = r#"
[connection]
scheme = "mqtt"
port = 1884
handshake_timeout_ms = 5000

[retry]
base_ms = 500
factor = 1.5
max_ms = 30000
count = 10

[logging]
log_level = "debug"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.port, 1884);
        assert_eq!(config.connection.keep_alive_secs, 30);
        assert_eq!(config.connection.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(config.logging.log_level, "debug");

        let opts = config.retry.options();
        assert_eq!(opts.base, Duration::from_millis(500));
        assert_eq!(opts.max, Some(Duration::from_secs(30)));
        assert_eq!(opts.count, Some(10));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.connection.scheme, "mqtt");
        assert_eq!(config.retry.options(), ExponentialOptions::default());
    }
}
