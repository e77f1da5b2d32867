//! Application state management

use crate::auth::password::PasswordConfig;
use crate::auth::{Auth, SessionBackend, SessionStoreError, UserStore, UserStoreError};
use crate::middleware::Metrics;
use homeguard_core::{AppConfig, Clock, ConfigModifier};
use std::sync::Arc;
use thiserror::Error;

/// Errors building the application state
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to load users: {0}")]
    Users(#[from] UserStoreError),

    #[error("Failed to load sessions: {0}")]
    Sessions(#[from] SessionStoreError),

    #[error("Failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Authentication subsystem
    pub auth: Arc<Auth>,
    /// Prometheus collectors
    pub metrics: Metrics,
    /// Argon2 parameters for passwords set through the API
    pub password_config: PasswordConfig,
}

impl AppState {
    /// Build the state, loading users from `config` and sessions from `backend`
    pub fn new(
        config: AppConfig,
        modifier: Arc<dyn ConfigModifier>,
        backend: Box<dyn SessionBackend>,
        clock: Arc<dyn Clock>,
        first_run: bool,
    ) -> Result<Self, StateError> {
        let users = Arc::new(UserStore::from_config(&config.users, modifier)?);
        let metrics = Metrics::new()?;
        let auth = Arc::new(
            Auth::new(&config.auth, users, backend, clock, first_run)?
                .with_blocked_counter(metrics.rate_limited.clone()),
        );

        Ok(Self {
            config,
            auth,
            metrics,
            password_config: PasswordConfig::default(),
        })
    }

    pub fn with_password_config(mut self, config: PasswordConfig) -> Self {
        self.password_config = config;
        self
    }
}
