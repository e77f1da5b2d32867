//! Homeguard web control plane
//!
//! Authentication and session gating for the appliance's HTTP API: login and
//! logout, persistent sessions, failed-login rate limiting, HTTP Basic and
//! GL-Inet vendor tokens.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::Router;
use state::AppState;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the application router
///
/// Layers, outermost first: request tracing, metrics, the authentication
/// gate. The fallback is gated too, so unknown paths answer 401 to
/// unauthenticated callers.
pub fn create_router(state: Arc<AppState>) -> Router {
    let routes = routes::control_routes().fallback(handlers::not_found);

    state
        .auth
        .wrap(routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Helpers for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use crate::auth::password::{hash_password_with_config, PasswordConfig};
    use crate::auth::SledBackend;
    use homeguard_core::{AppConfig, EmptyConfigModifier, ManualClock, WebUserConfig};

    /// A router together with the handles tests need to poke at
    pub struct TestApp {
        pub router: Router,
        pub state: Arc<AppState>,
        pub clock: Arc<ManualClock>,
    }

    /// Cheap Argon2 parameters so tests do not spend seconds hashing
    pub fn light_password_config() -> PasswordConfig {
        PasswordConfig {
            memory_cost: 8192,
            time_cost: 1,
            parallelism: 1,
            output_len: Some(32),
        }
    }

    pub fn test_user(name: &str, password: &str) -> WebUserConfig {
        WebUserConfig {
            name: name.to_string(),
            password: hash_password_with_config(password, &light_password_config())
                .expect("hash test password"),
        }
    }

    /// Build an app over a temporary session store and a manual clock
    pub fn create_test_app(config: AppConfig, first_run: bool) -> TestApp {
        let clock = Arc::new(ManualClock::default());
        let backend = SledBackend::temporary().expect("open temporary session store");

        let state = AppState::new(
            config,
            Arc::new(EmptyConfigModifier),
            Box::new(backend),
            clock.clone(),
            first_run,
        )
        .expect("build test state")
        .with_password_config(light_password_config());
        let state = Arc::new(state);

        TestApp {
            router: create_router(state.clone()),
            state,
            clock,
        }
    }

    /// Router with a single user `admin` / `password123`
    pub fn create_router_for_testing() -> Router {
        let config = AppConfig {
            users: vec![test_user("admin", "password123")],
            ..AppConfig::default()
        };

        create_test_app(config, false).router
    }
}

#[cfg(feature = "test-utils")]
pub use testing::create_router_for_testing;
