//! # Configuration Management
//!
//! Centralized configuration for the world connection layer.
//!
//! This module provides structured configuration for the listener, per-connection
//! buffering and framing limits, ping flood protection, handshake policy and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Security Considerations
//! - The inbound payload cap (10 KiB) bounds memory a hostile peer can pin
//! - The pending queue caps bound memory held for a reader that never drains
//! - The flush interval trades a few milliseconds of latency for far fewer writes

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Size of a client-to-server header: `payload_length: u16`, `opcode: u32`
pub const CLIENT_HEADER_SIZE: usize = 6;

/// Size of a server-to-client header: `payload_length: u16`, `opcode: u16`
pub const SERVER_HEADER_SIZE: usize = 4;

/// Max payload a client may claim in one frame
pub const MAX_INBOUND_PAYLOAD: usize = 10 * 1024;

/// Max payload the server may send in one frame (bounded by the u16 length field)
pub const MAX_OUTBOUND_PAYLOAD: usize = u16::MAX as usize;

/// Default capacity of the outbound coalescing buffer
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64 * 1024;

/// Default ceiling on how long a buffered frame waits before it is written
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Pings closer together than this count as over-speed
pub const DEFAULT_MIN_PING_INTERVAL: Duration = Duration::from_secs(27);

/// Consecutive over-speed pings tolerated before the connection is dropped
pub const DEFAULT_MAX_OVERSPEED_PINGS: u32 = 2;

/// Default cap on frames waiting behind a full outbound buffer
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 8192;

/// Default cap on bytes waiting behind a full outbound buffer
pub const DEFAULT_MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WorldConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-connection framing and buffering
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Ping flood protection
    #[serde(default)]
    pub flood: FloodConfig,

    /// Handshake policy
    #[serde(default)]
    pub auth: AuthConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WorldConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("WORLD_PROTOCOL_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(size) = std::env::var("WORLD_PROTOCOL_OUTBOUND_BUFFER") {
            if let Ok(val) = size.parse::<usize>() {
                config.connection.outbound_buffer_size = val;
            }
        }

        if let Ok(interval) = std::env::var("WORLD_PROTOCOL_FLUSH_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.connection.flush_interval = Duration::from_millis(val);
            }
        }

        if let Ok(frames) = std::env::var("WORLD_PROTOCOL_MAX_PENDING_FRAMES") {
            if let Ok(val) = frames.parse::<usize>() {
                config.connection.max_pending_frames = val;
            }
        }

        if let Ok(pings) = std::env::var("WORLD_PROTOCOL_MAX_OVERSPEED_PINGS") {
            if let Ok(val) = pings.parse::<u32>() {
                config.flood.max_overspeed_pings = val;
            }
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

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.connection.validate());
        errors.extend(self.flood.validate());
        errors.extend(self.auth.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
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

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// World listen address (e.g., "0.0.0.0:8085")
    pub address: String,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Disable Nagle on accepted sockets; coalescing already happens in userspace
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("0.0.0.0:8085"),
            max_connections: 5000,
            tcp_nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:8085')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        errors
    }
}

/// Per-connection framing and buffering configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Largest payload length a client header may claim
    pub max_inbound_payload: usize,

    /// Largest payload the server will frame
    pub max_outbound_payload: usize,

    /// Capacity of the coalescing buffer; a full buffer triggers an early flush
    pub outbound_buffer_size: usize,

    /// Forced flush period for partially filled buffers
    #[serde(with = "duration_serde")]
    pub flush_interval: Duration,

    /// Frames allowed to wait behind a full buffer before the connection is dropped
    pub max_pending_frames: usize,

    /// Bytes allowed to wait behind a full buffer before the connection is dropped
    pub max_pending_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_inbound_payload: MAX_INBOUND_PAYLOAD,
            max_outbound_payload: MAX_OUTBOUND_PAYLOAD,
            outbound_buffer_size: DEFAULT_OUTBOUND_BUFFER,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }
}

impl ConnectionConfig {
    /// Validate connection configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_inbound_payload == 0 {
            errors.push("Max inbound payload cannot be 0".to_string());
        } else if self.max_inbound_payload > u16::MAX as usize {
            errors.push(format!(
                "Max inbound payload {} exceeds what the 16-bit length field can carry",
                self.max_inbound_payload
            ));
        }

        if self.max_outbound_payload == 0 {
            errors.push("Max outbound payload cannot be 0".to_string());
        } else if self.max_outbound_payload > MAX_OUTBOUND_PAYLOAD {
            errors.push(format!(
                "Max outbound payload {} exceeds what the 16-bit length field can carry",
                self.max_outbound_payload
            ));
        }

        if self.outbound_buffer_size < 64 {
            errors.push("Outbound buffer too small (minimum: 64 bytes)".to_string());
        } else if self.outbound_buffer_size > 16 * 1024 * 1024 {
            errors.push(format!(
                "Outbound buffer too large: {} bytes (maximum: 16 MiB)",
                self.outbound_buffer_size
            ));
        }

        if self.flush_interval.is_zero() {
            errors.push("Flush interval cannot be 0".to_string());
        } else if self.flush_interval > Duration::from_millis(200) {
            errors.push("Flush interval too long (maximum: 200ms)".to_string());
        }

        if self.max_pending_frames == 0 {
            errors.push("Max pending frames must be greater than 0".to_string());
        }

        if self.max_pending_bytes < self.max_outbound_payload + SERVER_HEADER_SIZE {
            errors.push(
                "Max pending bytes must hold at least one maximum-size outbound frame".to_string(),
            );
        }

        errors
    }
}

/// Ping flood protection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FloodConfig {
    /// Pings closer together than this are over-speed
    #[serde(with = "duration_serde")]
    pub min_ping_interval: Duration,

    /// Consecutive over-speed pings tolerated; 0 disables the check
    pub max_overspeed_pings: u32,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            min_ping_interval: DEFAULT_MIN_PING_INTERVAL,
            max_overspeed_pings: DEFAULT_MAX_OVERSPEED_PINGS,
        }
    }
}

impl FloodConfig {
    /// Validate flood configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_overspeed_pings > 0 && self.min_ping_interval.is_zero() {
            errors.push(
                "Min ping interval cannot be 0 while over-speed detection is enabled".to_string(),
            );
        }

        if self.min_ping_interval > Duration::from_secs(300) {
            errors.push("Min ping interval too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Handshake policy
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AuthConfig {
    /// Client builds allowed to authenticate; empty accepts any build
    #[serde(default)]
    pub accepted_builds: Vec<u32>,
}

impl AuthConfig {
    /// Whether a client build passes the build filter
    pub fn accepts_build(&self, build: u32) -> bool {
        self.accepted_builds.is_empty() || self.accepted_builds.contains(&build)
    }

    /// Validate auth configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.accepted_builds.contains(&0) {
            errors.push("Build 0 is not a valid client build".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,

    /// Whether RUST_LOG may override `log_level`
    pub env_override: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("world-protocol"),
            log_level: Level::INFO,
            json_format: false,
            env_override: true,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
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

/// Helper module for Duration serialization/deserialization
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

/// Helper module for tracing::Level serialization/deserialization
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
