//! Command-line client configuration.
//!
//! Supports configuration from:
//! - TOML file (default: `stomplite.toml`)
//! - Environment variables with `STOMPLITE__` prefix (double underscore for nesting)
//! - In-file variable substitution: `${VAR}` or `${VAR:-default}`
//!
//! Environment variable examples:
//! - `STOMPLITE__BROKER__ADDRESS=broker.local:61613`
//! - `STOMPLITE__BROKER__TRANSPORT=websocket`
//! - `STOMPLITE__LIMITS__MAX_FRAME_SIZE=2097152`
//!
//! In-file substitution examples:
//! ```toml
//! [broker]
//! address = "${STOMP_HOST:-127.0.0.1}:${STOMP_PORT:-61613}"
//! passcode = "${STOMP_PASSCODE}"
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use stomplite_client::ClientConfig;
use thiserror::Error;

// === Default Constants ===

pub const DEFAULT_CONFIG_PATH: &str = "stomplite.toml";

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:61613";

pub const DEFAULT_URL: &str = "ws://127.0.0.1:61614/stomp";

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default largest buffered frame (1MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = stomplite_client::DEFAULT_MAX_FRAME_SIZE;

const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

// === Environment Variable Substitution ===

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let substituted = re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    });
    Ok(substituted.into_owned())
}

// === Configuration Structures ===

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub broker: BrokerConfig,
    pub limits: LimitsConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: off, error, warn, info, debug, trace.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// How to reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    WebSocket,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub transport: TransportKind,
    /// host:port for the TCP transport.
    pub address: String,
    /// `ws://` URL for the WebSocket transport.
    pub url: String,
    pub login: String,
    pub passcode: String,
    /// Virtual host sent with CONNECT.
    pub host: Option<String>,
    /// Sent as `accept-version` with CONNECT.
    pub accept_version: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Tcp,
            address: DEFAULT_ADDRESS.to_string(),
            url: DEFAULT_URL.to_string(),
            login: String::new(),
            passcode: String::new(),
            host: None,
            accept_version: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl BrokerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// The address or URL the selected transport connects to.
    pub fn endpoint(&self) -> &str {
        match self.transport {
            TransportKind::Tcp => &self.address,
            TransportKind::WebSocket => &self.url,
        }
    }
}

/// Limits configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest partial frame buffered before the connection is dropped.
    /// 0 = unbounded.
    pub max_frame_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("broker.transport", "tcp")?
            .set_default("broker.address", DEFAULT_ADDRESS)?
            .set_default("broker.url", DEFAULT_URL)?
            .set_default("broker.login", "")?
            .set_default("broker.passcode", "")?
            .set_default(
                "broker.connect_timeout_secs",
                DEFAULT_CONNECT_TIMEOUT_SECS as i64,
            )?
            .set_default("limits.max_frame_size", DEFAULT_MAX_FRAME_SIZE as i64)?;

        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let substituted = substitute_env_vars(&content)?;
            builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
        }

        // Override with environment variables (STOMPLITE__BROKER__ADDRESS, etc.)
        let cfg = builder
            .add_source(
                Environment::with_prefix("STOMPLITE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    #[allow(dead_code)]
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content)?;
        let config: Config = toml::from_str(&substituted)
            .map_err(|e| ConfigError::Validation(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "log.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }

        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "broker.connect_timeout_secs must be at least 1".into(),
            ));
        }

        match self.broker.transport {
            TransportKind::Tcp => {
                if self.broker.address.is_empty() {
                    return Err(ConfigError::Validation(
                        "broker.address is required for the tcp transport".into(),
                    ));
                }
            }
            TransportKind::WebSocket => {
                if !self.broker.url.starts_with("ws://") {
                    return Err(ConfigError::Validation(
                        "broker.url must be a ws:// URL".into(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Session settings for the client library.
    pub fn client_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new().max_frame_size(self.limits.max_frame_size);
        if let Some(host) = &self.broker.host {
            client = client.host(host.as_str());
        }
        if let Some(versions) = &self.broker.accept_version {
            client = client.accept_version(versions.as_str());
        }
        client
    }
}
