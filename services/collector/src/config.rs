//! Configuration for the collector service.
//!
//! Loaded once at startup from optional config files and environment
//! variables (prefixed with `COLLECTOR`), then passed by ownership into the
//! server state. Nothing reads the environment during request handling.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the collector service.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// InfluxDB connection settings (all required)
    pub influx: InfluxConfig,

    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Batched write settings
    #[serde(default)]
    pub write: WriteConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// InfluxDB v2 connection settings.
///
/// Every field is required; startup fails if any is missing.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    pub host: String,
    pub port: u16,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

/// Batched write settings for the sink.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteConfig {
    /// Flush when this many points are buffered
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Flush when this much time has passed since the last flush
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log full request payloads (noisy; off by default)
    #[serde(default)]
    pub debug_payloads: bool,
}

// Default value functions
fn default_server_host() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    5353
}
fn default_batch_size() -> usize {
    10_000
}
fn default_flush_interval_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            debug_payloads: false,
        }
    }
}

impl CollectorConfig {
    /// Load configuration from files and environment variables.
    ///
    /// Sources, later overriding earlier:
    /// 1. config/default.toml
    /// 2. config/{RUN_MODE}.toml
    /// 3. Environment variables (e.g. COLLECTOR__INFLUX__HOST)
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("COLLECTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("COLLECTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.influx.host.is_empty() {
            return Err(ConfigValidationError::MissingField("influx.host".to_string()));
        }
        if self.influx.port == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "influx.port".to_string(),
                message: "Port must be greater than 0".to_string(),
            });
        }
        if self.influx.org.is_empty() {
            return Err(ConfigValidationError::MissingField("influx.org".to_string()));
        }
        if self.influx.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "influx.bucket".to_string(),
            ));
        }
        if self.influx.token.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "influx.token".to_string(),
            ));
        }
        if self.write.batch_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "write.batch_size".to_string(),
                message: "Batch size must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl InfluxConfig {
    /// URL of the v2 write endpoint.
    pub fn write_url(&self) -> String {
        format!("http://{}:{}/api/v2/write", self.host, self.port)
    }
}

impl WriteConfig {
    /// Get the flush interval as Duration.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> CollectorConfig {
        CollectorConfig {
            influx: InfluxConfig {
                host: "influxdb".to_string(),
                port: 8086,
                org: "home".to_string(),
                bucket: "health".to_string(),
                token: "secret".to_string(),
            },
            server: ServerConfig::default(),
            write: WriteConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = create_test_config();
        assert_eq!(config.server.port, 5353);
        assert_eq!(config.write.batch_size, 10_000);
        assert_eq!(config.write.flush_interval(), Duration::from_secs(5));
        assert!(!config.logging.debug_payloads);
    }

    #[test]
    fn test_missing_influx_host() {
        let mut config = create_test_config();
        config.influx.host = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_missing_influx_token() {
        let mut config = create_test_config();
        config.influx.token = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = create_test_config();
        config.write.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_write_url() {
        let config = create_test_config();
        assert_eq!(
            config.influx.write_url(),
            "http://influxdb:8086/api/v2/write"
        );
    }
}
