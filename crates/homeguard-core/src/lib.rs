//! Homeguard Core - configuration, time source and change hooks
//!
//! This crate holds the pieces the web control plane and the CLI share:
//! - Configuration management (TOML file + environment overrides)
//! - The wall-clock abstraction used by every expiry decision
//! - The "users changed" notification hook

pub mod clock;
pub mod config;
pub mod modifier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, AuthConfig, ConfigError, LoggingConfig, ServerConfig, WebUserConfig};
pub use modifier::{ConfigModifier, EmptyConfigModifier, FileConfigModifier};
