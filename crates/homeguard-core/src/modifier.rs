//! "Users changed" notification hook
//!
//! The user store calls a [`ConfigModifier`] whenever its set of users
//! changes, so the owning process can persist the new list.

use crate::config::{AppConfig, ConfigError, WebUserConfig};
use std::path::PathBuf;
use std::sync::Mutex;

/// Receives the full user list after every change
pub trait ConfigModifier: Send + Sync {
    /// Persist or otherwise react to the new user list
    fn apply(&self, users: &[WebUserConfig]) -> Result<(), ConfigError>;
}

/// Modifier that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyConfigModifier;

impl ConfigModifier for EmptyConfigModifier {
    fn apply(&self, _users: &[WebUserConfig]) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Modifier that rewrites the TOML configuration file
#[derive(Debug)]
pub struct FileConfigModifier {
    path: PathBuf,
    base: Mutex<AppConfig>,
}

impl FileConfigModifier {
    /// Create a modifier writing `base` (with updated users) to `path`
    pub fn new(path: impl Into<PathBuf>, base: AppConfig) -> Self {
        Self {
            path: path.into(),
            base: Mutex::new(base),
        }
    }

    /// Target file path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl ConfigModifier for FileConfigModifier {
    fn apply(&self, users: &[WebUserConfig]) -> Result<(), ConfigError> {
        let mut base = self.base.lock().unwrap_or_else(|e| e.into_inner());
        base.users = users.to_vec();
        base.save(&self.path)?;

        tracing::info!(path = %self.path.display(), users = users.len(), "Users written to configuration");

        Ok(())
    }
}
