//! Configuration loading, environment overrides, and validation.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse TOML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    /// Invalid configuration value.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub datafeed: DatafeedConfig,
    pub broker: BrokerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            datafeed: DatafeedConfig::default(),
            broker: BrokerConfig::default(),
        }
    }
}

/// Server and connection-lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds of inbound silence before a connection is torn down.
    pub heartbeat_timeout_secs: u64,
    /// Hard cap on connection age in seconds.
    pub max_connection_lifetime_secs: u64,
    /// Bounded queue size per route's broadcast pump.
    pub route_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            heartbeat_timeout_secs: 30,
            max_connection_lifetime_secs: 3600,
            route_queue_capacity: 1024,
        }
    }
}

impl ServerConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn max_connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_connection_lifetime_secs)
    }
}

/// Datafeed engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatafeedConfig {
    pub enabled: bool,
    /// Generator tick interval in seconds.
    pub interval_secs: f64,
    /// Symbols the engine knows how to quote/bar.
    pub symbols: Vec<String>,
    /// Resolutions (in minutes, as strings) the engine knows how to bar.
    pub resolutions: Vec<String>,
}

impl Default for DatafeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 2.0,
            symbols: vec!["AAPL".to_string(), "MSFT".to_string(), "GOOG".to_string()],
            resolutions: vec!["1".to_string(), "5".to_string()],
        }
    }
}

impl DatafeedConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs.max(0.001))
    }
}

/// Delay policy between execution-simulator iterations.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionDelay {
    /// Uniform random delay in `[1s, 2s]`, the production default.
    Random,
    /// Fixed delay in seconds, used to make tests deterministic.
    Fixed(f64),
    /// Simulator never runs automatically; a test drives executions manually.
    Disabled,
}

impl Default for ExecutionDelay {
    fn default() -> Self {
        ExecutionDelay::Random
    }
}

/// Broker engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub execution_delay: ExecutionDelay,
    pub starting_balance: f64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            execution_delay: ExecutionDelay::Random,
            starting_balance: 100_000.0,
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file, falling back to defaults if the
    /// file does not exist, then applies `HOST`/`PORT` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = if path.as_ref().exists() {
            let content = fs::read_to_string(path)?;
            Self::parse(&content)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.datafeed.enabled && self.datafeed.symbols.is_empty() {
            return Err(ConfigError::InvalidValue(
                "datafeed.symbols must not be empty when datafeed.enabled is true".to_string(),
            ));
        }
        if self.datafeed.enabled && self.datafeed.resolutions.is_empty() {
            return Err(ConfigError::InvalidValue(
                "datafeed.resolutions must not be empty when datafeed.enabled is true"
                    .to_string(),
            ));
        }
        if self.datafeed.interval_secs <= 0.0 {
            return Err(ConfigError::InvalidValue(
                "datafeed.interval_secs must be positive".to_string(),
            ));
        }
        if self.server.route_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "server.route_queue_capacity must be positive".to_string(),
            ));
        }
        if self.broker.starting_balance < 0.0 {
            return Err(ConfigError::InvalidValue(
                "broker.starting_balance must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_toml() {
        let toml_content = r#"
[server]
host = "127.0.0.1"
port = 3000

[datafeed]
enabled = true
interval_secs = 1.0
symbols = ["AAPL"]
resolutions = ["1"]

[broker]
starting_balance = 50000.0
"#;
        let config = Config::parse(toml_content).expect("should parse");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.datafeed.symbols, vec!["AAPL".to_string()]);
        assert_eq!(config.broker.starting_balance, 50000.0);
        assert_eq!(config.broker.execution_delay, ExecutionDelay::Random);
    }

    #[test]
    fn rejects_empty_symbols_when_enabled() {
        let config = Config {
            datafeed: DatafeedConfig {
                enabled: true,
                symbols: vec![],
                ..DatafeedConfig::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_queue_capacity() {
        let config = Config {
            server: ServerConfig {
                route_queue_capacity: 0,
                ..ServerConfig::default()
            },
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let config = Config::load("/nonexistent/path/config.toml").expect("should fall back");
        assert_eq!(config.server.port, Config::default().server.port);
    }
}
