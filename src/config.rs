//! # Configuration Management
//!
//! Centralized configuration for the gateway, the packet codec and the
//! cluster coordinator.
//!
//! ## Configuration Sources
//! - TOML files via [`GatewayConfig::from_file`]
//! - TOML strings via [`GatewayConfig::from_toml`]
//! - Environment variables (`PACKET_GATEWAY_*`) via [`GatewayConfig::from_env`]
//! - Defaults with a closure of overrides via [`GatewayConfig::default_with_overrides`]
//!
//! Durations are written as integer milliseconds.

use crate::core::prefix::PrefixKind;
use crate::core::serialization::BodyFormat;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "PACKET_GATEWAY_";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub codec: CodecConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `PACKET_GATEWAY_*` variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Defaults overridden by `lookup`, which receives keys without the prefix.
    /// Unparseable values are a configuration error rather than silently ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("SERVER_ADDRESS") {
            config.server.address = addr;
        }
        if let Some(value) = lookup("MAX_CONNECTIONS") {
            config.server.max_connections = parse_env("MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = lookup("SESSION_QUEUE_CAPACITY") {
            config.server.session_queue_capacity = parse_env("SESSION_QUEUE_CAPACITY", &value)?;
        }
        if let Some(value) = lookup("IDLE_TIMEOUT_MS") {
            config.server.idle_timeout =
                Duration::from_millis(parse_env("IDLE_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("SHUTDOWN_TIMEOUT_MS") {
            config.server.shutdown_timeout =
                Duration::from_millis(parse_env("SHUTDOWN_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("BODY_FORMAT") {
            config.codec.body_format = parse_keyword("BODY_FORMAT", &value)?;
        }
        if let Some(value) = lookup("PREFIX") {
            config.codec.prefix = parse_keyword("PREFIX", &value)?;
        }
        if let Some(addr) = lookup("COORDINATOR_ADDRESS") {
            config.cluster.coordinator_address = addr;
        }
        if let Some(value) = lookup("LOGIN_TIMEOUT_MS") {
            config.cluster.login_timeout =
                Duration::from_millis(parse_env("LOGIN_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("MAX_NODES") {
            config.cluster.max_nodes = parse_env("MAX_NODES", &value)?;
        }
        if let Some(value) = lookup("TIMESTAMP_WINDOW_MS") {
            config.cluster.timestamp_window =
                Duration::from_millis(parse_env("TIMESTAMP_WINDOW_MS", &value)?);
        }
        if let Some(value) = lookup("LOG_LEVEL") {
            config.logging.log_level = value.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid LOG_LEVEL value: '{value}'"))
            })?;
        }
        if let Some(value) = lookup("LOG_JSON") {
            config.logging.json_format = parse_env("LOG_JSON", &value)?;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))
    }

    /// Validate every section. An empty list means the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.codec.validate());
        errors.extend(self.cluster.validate());
        errors.extend(self.logging.validate());
        errors
    }

    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid {key} value: '{value}'")))
}

/// Parse a lowercase enum keyword through its serde representation
fn parse_keyword<T: serde::de::DeserializeOwned>(key: &str, value: &str) -> Result<T> {
    let normalized = value.trim().to_ascii_lowercase();
    T::deserialize(serde::de::value::StrDeserializer::<serde::de::value::Error>::new(
        &normalized,
    ))
    .map_err(|_| ProtocolError::ConfigError(format!("Invalid {key} value: '{value}'")))
}

/// Listener and per-session settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "127.0.0.1:7100")
    pub address: String,

    pub max_connections: usize,

    /// Frames buffered per session before sends report backpressure
    pub session_queue_capacity: usize,

    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:7100"),
            max_connections: 10_000,
            session_queue_capacity: 256,
            idle_timeout: timeout::IDLE_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            connect_timeout: timeout::DEFAULT_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:7100')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        }

        if self.session_queue_capacity == 0 {
            errors.push("Session queue capacity must be greater than 0".to_string());
        } else if self.session_queue_capacity > 1_000_000 {
            errors.push(format!(
                "Session queue capacity too large: {} (max recommended: 1,000,000)",
                self.session_queue_capacity
            ));
        }

        if self.idle_timeout.as_millis() < 100 {
            errors.push("Idle timeout too short (minimum: 100ms)".to_string());
        }

        if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.connect_timeout.as_millis() < 10 {
            errors.push("Connect timeout too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Wire settings that both ends of a hop must agree on
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CodecConfig {
    pub body_format: BodyFormat,
    pub prefix: PrefixKind,
}

impl CodecConfig {
    pub fn validate(&self) -> Vec<String> {
        // Every combination is valid; kept for symmetry with the other sections
        Vec::new()
    }
}

/// Cluster coordinator settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Address nodes dial to log in
    pub coordinator_address: String,

    /// How long a node waits for the coordinator's login response
    #[serde(with = "duration_serde")]
    pub login_timeout: Duration,

    /// Registered nodes the coordinator accepts before refusing new machines
    pub max_nodes: usize,

    /// Maximum clock skew accepted on login timestamps
    #[serde(with = "duration_serde")]
    pub timestamp_window: Duration,

    #[serde(with = "duration_serde")]
    pub replay_ttl: Duration,

    pub replay_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            coordinator_address: String::from("127.0.0.1:7200"),
            login_timeout: Duration::from_secs(10),
            max_nodes: 4096,
            timestamp_window: Duration::from_secs(30),
            replay_ttl: Duration::from_secs(300),
            replay_capacity: 10_000,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.coordinator_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid coordinator address format: '{}'",
                self.coordinator_address
            ));
        }

        if self.login_timeout.is_zero() {
            errors.push("Login timeout must be greater than 0".to_string());
        }

        if self.max_nodes == 0 {
            errors.push("Max nodes must be greater than 0".to_string());
        }

        if self.timestamp_window.is_zero() {
            errors.push("Timestamp window must be greater than 0".to_string());
        }

        // A nonce must outlive the window in which its timestamp is accepted
        if self.replay_ttl < self.timestamp_window * 2 {
            errors.push(format!(
                "Replay TTL ({}ms) must be at least twice the timestamp window ({}ms)",
                self.replay_ttl.as_millis(),
                self.timestamp_window.as_millis()
            ));
        }

        if self.replay_capacity == 0 {
            errors.push("Replay cache capacity must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub app_name: String,

    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("packet-gateway"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        assert!(GatewayConfig::default().validate().is_empty());
        assert!(GatewayConfig::default().validate_strict().is_ok());
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SERVER_ADDRESS", "0.0.0.0:9100"),
            ("BODY_FORMAT", "MessagePack"),
            ("PREFIX", "uuid"),
            ("IDLE_TIMEOUT_MS", "2500"),
            ("LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let config =
            GatewayConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.server.address, "0.0.0.0:9100");
        assert_eq!(config.codec.body_format, BodyFormat::MessagePack);
        assert_eq!(config.codec.prefix, PrefixKind::Uuid);
        assert_eq!(config.server.idle_timeout, Duration::from_millis(2500));
        assert_eq!(config.logging.log_level, Level::DEBUG);
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let result = GatewayConfig::from_lookup(|key| {
            (key == "MAX_CONNECTIONS").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(ProtocolError::ConfigError(_))));

        let result =
            GatewayConfig::from_lookup(|key| (key == "PREFIX").then(|| "u16".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_replay_ttl_must_cover_window() {
        let config = GatewayConfig::default_with_overrides(|c| {
            c.cluster.timestamp_window = Duration::from_secs(60);
            c.cluster.replay_ttl = Duration::from_secs(60);
        });
        assert_eq!(config.validate().len(), 1);
    }
}
