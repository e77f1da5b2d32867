//! Authentication and session gating
//!
//! This module provides the pieces that decide whether a request comes from a
//! known user:
//! - Password hashing with Argon2 (bcrypt accepted for existing hashes)
//! - The user store
//! - Session tokens, the session store and its sled backend
//! - The failed-login rate limiter
//! - GL-Inet token files
//! - The request gate, applied with [`Auth::wrap`]
//!
//! [`Auth`] owns all of them and is built once at startup.

pub mod cookie;
pub mod glinet;
pub mod middleware;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod token;
pub mod users;

pub use cookie::{SESSION_COOKIE_NAME, COOKIE_TTL_DAYS};
pub use glinet::GlinetChecker;
pub use middleware::{auth_middleware, AuthError, AuthMethod, AuthenticatedUser};
pub use password::{hash_password, verify_password, Password, PasswordError};
pub use rate_limit::RateLimiter;
pub use session::{
    Session, SessionBackend, SessionCheck, SessionStore, SessionStoreError, SledBackend,
};
pub use token::{RandomSourceError, SessionToken};
pub use users::{Login, User, UserId, UserStore, UserStoreError};

use axum::Router;
use homeguard_core::{AuthConfig, Clock};
use prometheus::IntCounter;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The authentication subsystem
pub struct Auth {
    users: Arc<UserStore>,
    sessions: SessionStore,
    rate_limiter: RateLimiter,
    glinet: Option<GlinetChecker>,
    clock: Arc<dyn Clock>,
    trusted_proxies: Vec<IpAddr>,
    first_run: AtomicBool,
    blocked: Option<IntCounter>,
}

impl Auth {
    /// Build the subsystem and load persisted sessions
    ///
    /// Fails if the session backend cannot be read; the server must not start
    /// in that case.
    pub fn new(
        config: &AuthConfig,
        users: Arc<UserStore>,
        backend: Box<dyn SessionBackend>,
        clock: Arc<dyn Clock>,
        first_run: bool,
    ) -> Result<Self, SessionStoreError> {
        let sessions = SessionStore::new(backend, clock.clone(), config.session_ttl());
        sessions.load_all(&users)?;

        let rate_limiter = RateLimiter::new(
            clock.clone(),
            config.auth_attempts,
            config.block_duration(),
        );

        let glinet = config
            .glinet_mode
            .then(|| GlinetChecker::new(config.glinet_token_prefix.clone(), clock.clone()));

        if glinet.is_some() {
            tracing::info!(prefix = %config.glinet_token_prefix, "GL-Inet compatibility mode enabled");
        }

        Ok(Self {
            users,
            sessions,
            rate_limiter,
            glinet,
            clock,
            trusted_proxies: config.trusted_proxies.clone(),
            first_run: AtomicBool::new(first_run),
            blocked: None,
        })
    }

    /// Count gate-level refusals by the rate limiter in `counter`
    pub fn with_blocked_counter(mut self, counter: IntCounter) -> Self {
        self.blocked = Some(counter);
        self
    }

    /// Note an authentication attempt refused by the rate limiter
    pub fn record_blocked(&self) {
        if let Some(counter) = &self.blocked {
            counter.inc();
        }
    }

    pub fn users(&self) -> &Arc<UserStore> {
        &self.users
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Vendor token checker, present only in GL-Inet mode
    pub fn glinet(&self) -> Option<&GlinetChecker> {
        self.glinet.as_ref()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.trusted_proxies
    }

    pub fn is_first_run(&self) -> bool {
        self.first_run.load(Ordering::SeqCst)
    }

    /// Leave first-run mode
    ///
    /// Returns `false` if installation had already completed.
    pub fn finish_install(&self) -> bool {
        self.first_run.swap(false, Ordering::SeqCst)
    }

    /// Re-enter first-run mode after a failed installation
    pub fn restore_first_run(&self) {
        self.first_run.store(true, Ordering::SeqCst);
    }

    /// Whether requests must be authenticated at all
    pub fn needs_authentication(&self) -> bool {
        !self.is_first_run() && !self.users.is_empty()
    }

    /// Apply the authentication gate to every route of `router`
    pub fn wrap<S>(self: &Arc<Self>, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(axum::middleware::from_fn_with_state(
            self.clone(),
            auth_middleware,
        ))
    }

    /// Flush persistent state
    pub fn close(&self) -> Result<(), SessionStoreError> {
        self.sessions.close()
    }
}
