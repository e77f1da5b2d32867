//! Homeguard Configuration Management
//!
//! Handles configuration from a TOML file and environment variables, with
//! defaults matching a freshly installed appliance.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Latest session expiry a session record can hold, in Unix seconds
pub const MAX_SESSION_EXPIRY_SECS: i64 = u32::MAX as i64;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener configuration
    pub server: ServerConfig,

    /// Authentication and session settings
    pub auth: AuthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Web users allowed to access the control plane
    pub users: Vec<WebUserConfig>,
}

impl AppConfig {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Apply overrides from a key lookup function
    ///
    /// Split out from [`AppConfig::with_env_override`] so overrides can be
    /// exercised without mutating the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(host) = lookup("HOMEGUARD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("HOMEGUARD_PORT") {
            self.server.port = parse_value("HOMEGUARD_PORT", port)?;
        }

        // Auth
        if let Some(v) = lookup("HOMEGUARD_AUTH_ATTEMPTS") {
            self.auth.auth_attempts = parse_value("HOMEGUARD_AUTH_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("HOMEGUARD_BLOCK_AUTH_MIN") {
            self.auth.block_auth_min = parse_value("HOMEGUARD_BLOCK_AUTH_MIN", v)?;
        }
        if let Some(v) = lookup("HOMEGUARD_SESSION_TTL_HOURS") {
            self.auth.session_ttl_hours = parse_value("HOMEGUARD_SESSION_TTL_HOURS", v)?;
        }
        if let Some(path) = lookup("HOMEGUARD_SESSIONS_DB") {
            self.auth.sessions_db = PathBuf::from(path);
        }
        if let Some(v) = lookup("HOMEGUARD_GLINET") {
            self.auth.glinet_mode = parse_bool("HOMEGUARD_GLINET", &v)?;
        }

        // Trusted proxies from environment variable (comma-separated)
        if let Some(list) = lookup("HOMEGUARD_TRUSTED_PROXIES") {
            self.auth.trusted_proxies = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_value("HOMEGUARD_TRUSTED_PROXIES", s.to_string()))
                .collect::<Result<_, _>>()?;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.json_format = format.eq_ignore_ascii_case("json");
        }

        Ok(())
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.session_ttl_hours == 0 {
            return Err(ConfigError::InvalidValue {
                key: "auth.session_ttl_hours".to_string(),
                value: "0".to_string(),
            });
        }

        // Session records store the expiry as a u32 Unix timestamp.
        let ttl_secs = i64::from(self.auth.session_ttl_hours) * 3600;
        if Utc::now().timestamp() + ttl_secs > MAX_SESSION_EXPIRY_SECS {
            return Err(ConfigError::InvalidValue {
                key: "auth.session_ttl_hours".to_string(),
                value: self.auth.session_ttl_hours.to_string(),
            });
        }

        if self.auth.sessions_db.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired("auth.sessions_db".to_string()));
        }

        if self.auth.glinet_mode && self.auth.glinet_token_prefix.is_empty() {
            return Err(ConfigError::MissingRequired(
                "auth.glinet_token_prefix".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for user in &self.users {
            if user.name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "users.name".to_string(),
                    value: String::new(),
                });
            }
            if !seen.insert(user.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "users.name".to_string(),
                    value: user.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Write the configuration back to a TOML file
    ///
    /// The file is written next to the target and renamed over it, so a crash
    /// mid-write leaves the previous file intact.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError {
            message: e.to_string(),
        })?;

        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content).map_err(|e| ConfigError::FileWriteError {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, path).map_err(|e| ConfigError::FileWriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!(path = %path.display(), users = self.users.len(), "Saved configuration");

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Failed logins from one address before it is blocked (0 disables)
    pub auth_attempts: u32,

    /// Block duration in minutes after `auth_attempts` failures
    pub block_auth_min: u32,

    /// Server-side session lifetime in hours, renewed on use
    pub session_ttl_hours: u32,

    /// Location of the persistent session store
    pub sessions_db: PathBuf,

    /// Proxies whose forwarding headers are trusted for logging the client address
    pub trusted_proxies: Vec<IpAddr>,

    /// GL-Inet compatibility mode
    pub glinet_mode: bool,

    /// Path prefix of the vendor token files
    pub glinet_token_prefix: String,
}

impl AuthConfig {
    /// Session TTL as a duration
    pub fn session_ttl(&self) -> Duration {
        Duration::hours(i64::from(self.session_ttl_hours))
    }

    /// Block duration as a duration
    pub fn block_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.block_auth_min))
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_attempts: 5,
            block_auth_min: 15,
            session_ttl_hours: 30 * 24,
            sessions_db: PathBuf::from("data/sessions.db"),
            trusted_proxies: vec![],
            glinet_mode: false,
            glinet_token_prefix: "/tmp/gl_token_".to_string(),
        }
    }
}

/// A web user as stored in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebUserConfig {
    /// Login name
    pub name: String,

    /// Password hash (Argon2 PHC string or bcrypt)
    pub password: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    FileWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Failed to serialize config: {message}")]
    SerializeError { message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
