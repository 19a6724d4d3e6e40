//! Configuration management for the Conductor client.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/conductor/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Default origin of the built-in local endpoint.
pub const DEFAULT_LOCAL_URL: &str = "http://127.0.0.1:8080";

/// Default name of the ambient session cookie set by the local server.
pub const DEFAULT_SESSION_COOKIE: &str = "ai_conductor_session";

/// File name of the endpoint registry inside the data directory.
pub const ENDPOINTS_FILE: &str = "endpoints.json";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_attempts must be between 1 and 1000, got {0}")]
    InvalidMaxAttempts(u32),

    #[error("base_delay_ms must be greater than 0 and not exceed max_delay_ms ({max}), got {base}")]
    InvalidBaseDelay { base: u64, max: u64 },

    #[error("request_timeout_secs must be between 1 and 300, got {0}")]
    InvalidRequestTimeout(u64),

    #[error("local url must be an http:// or https:// URL, got {0}")]
    InvalidLocalUrl(String),

    #[error("session_cookie must not be empty")]
    EmptySessionCookie,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Conductor client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General client configuration.
    pub client: GeneralConfig,

    /// The built-in local endpoint.
    pub local: LocalConfig,

    /// Stream reconnection policy.
    pub reconnect: ReconnectConfig,

    /// HTTP client settings.
    pub http: HttpConfig,
}

/// General client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding durable client state (the endpoint registry).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Settings for the built-in local endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalConfig {
    /// Origin the local endpoint is served from. Its scheme decides
    /// whether the local stream uses `ws://` or `wss://`.
    pub url: String,

    /// Cookie name carrying the ambient local session.
    pub session_cookie: String,
}

/// Reconnection policy for session streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Attempts before the stream is abandoned.
    pub max_attempts: u32,

    /// Delay before the first attempt, doubled on every further attempt.
    pub base_delay_ms: u64,

    /// Upper bound on a single delay.
    pub max_delay_ms: u64,
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Timeout applied to every API call.
    pub request_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_LOCAL_URL.to_string(),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
        }
    }
}

impl HttpConfig {
    /// Returns the request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conductor")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("conductor")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - CONDUCTOR_LOCAL_URL: Override the local endpoint origin
    /// - CONDUCTOR_DATA_DIR: Override the data directory
    /// - CONDUCTOR_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CONDUCTOR_LOCAL_URL") {
            if !url.is_empty() {
                tracing::info!("Overriding local url from environment: {}", url);
                self.local.url = url;
            }
        }

        if let Ok(dir) = std::env::var("CONDUCTOR_DATA_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding data_dir from environment: {}", dir);
                self.client.data_dir = PathBuf::from(dir);
            }
        }

        if let Ok(level) = std::env::var("CONDUCTOR_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.client.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect.max_attempts < 1 || self.reconnect.max_attempts > 1000 {
            return Err(ConfigError::InvalidMaxAttempts(self.reconnect.max_attempts));
        }

        if self.reconnect.base_delay_ms == 0
            || self.reconnect.base_delay_ms > self.reconnect.max_delay_ms
        {
            return Err(ConfigError::InvalidBaseDelay {
                base: self.reconnect.base_delay_ms,
                max: self.reconnect.max_delay_ms,
            });
        }

        if self.http.request_timeout_secs < 1 || self.http.request_timeout_secs > 300 {
            return Err(ConfigError::InvalidRequestTimeout(
                self.http.request_timeout_secs,
            ));
        }

        self.local_url()?;

        if self.local.session_cookie.trim().is_empty() {
            return Err(ConfigError::EmptySessionCookie);
        }

        let level = self.client.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.client.log_level.clone()));
        }

        Ok(())
    }

    /// Parses the local endpoint origin.
    pub fn local_url(&self) -> Result<Url, ConfigError> {
        match Url::parse(&self.local.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(url),
            _ => Err(ConfigError::InvalidLocalUrl(self.local.url.clone())),
        }
    }

    /// Path of the endpoint registry file.
    pub fn endpoints_path(&self) -> PathBuf {
        self.client.data_dir.join(ENDPOINTS_FILE)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.client.log_level, "info");
        assert_eq!(config.local.url, DEFAULT_LOCAL_URL);
        assert_eq!(config.local.session_cookie, "ai_conductor_session");
        assert_eq!(config.reconnect.max_attempts, 20);
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.http.request_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[local]
url = "https://conductor.lan:8443"

[reconnect]
max_attempts = 5
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.local.url, "https://conductor.lan:8443");
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
        assert_eq!(config.client.log_level, "info");
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[client\nlog_level = \"debug\"");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.client.log_level = "warn".to_string();
        original.reconnect.max_delay_ms = 60_000;
        original.local.session_cookie = "sid".to_string();

        let loaded = Config::from_toml(&original.to_toml().unwrap()).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.client.data_dir = temp_dir.path().to_path_buf();
        config.save(&config_path).unwrap();

        let loaded = Config::load(&config_path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_endpoints_path() {
        let mut config = Config::default();
        config.client.data_dir = PathBuf::from("/var/lib/conductor");
        assert_eq!(
            config.endpoints_path(),
            PathBuf::from("/var/lib/conductor/endpoints.json")
        );
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("conductor"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_validate_max_attempts_bounds() {
        let mut config = Config::default();
        config.reconnect.max_attempts = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxAttempts(0)));

        config.reconnect.max_attempts = 1001;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMaxAttempts(1001))
        );

        config.reconnect.max_attempts = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_base_delay_above_max() {
        let mut config = Config::default();
        config.reconnect.base_delay_ms = 60_000;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBaseDelay {
                base: 60_000,
                max: 30_000
            })
        );
    }

    #[test]
    fn test_validate_local_url() {
        let mut config = Config::default();
        config.local.url = "ws://127.0.0.1:8080".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLocalUrl(_))
        ));

        config.local.url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLocalUrl(_))
        ));

        config.local.url = "https://example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.client.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.client.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    #[serial]
    fn test_env_override_local_url() {
        std::env::set_var("CONDUCTOR_LOCAL_URL", "https://override.example:9000");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.local.url, "https://override.example:9000");

        std::env::remove_var("CONDUCTOR_LOCAL_URL");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("CONDUCTOR_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.client.log_level, "info");

        std::env::remove_var("CONDUCTOR_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_data_dir() {
        std::env::set_var("CONDUCTOR_DATA_DIR", "/tmp/conductor-test");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.client.data_dir, PathBuf::from("/tmp/conductor-test"));

        std::env::remove_var("CONDUCTOR_DATA_DIR");
    }
}
