//! Metrics tracking
//!
//! Prometheus collectors for the control plane and the middleware that counts
//! HTTP requests by endpoint and status.

use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Outcome label values for login attempts
pub const LOGIN_SUCCESS: &str = "success";
pub const LOGIN_FAILURE: &str = "failure";
pub const LOGIN_BLOCKED: &str = "blocked";

/// Collectors owned by the application state
pub struct Metrics {
    registry: Registry,
    pub http_requests: IntCounterVec,
    pub login_attempts: IntCounterVec,
    pub rate_limited: IntCounter,
    pub active_sessions: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("homeguard".to_string()), None)?;

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by endpoint and status"),
            &["endpoint", "status"],
        )?;
        let login_attempts = IntCounterVec::new(
            Opts::new("login_attempts_total", "Login attempts by outcome"),
            &["outcome"],
        )?;
        let rate_limited = IntCounter::new(
            "auth_rate_limited_total",
            "Authentication attempts refused by the rate limiter",
        )?;
        let active_sessions = IntGauge::new("active_sessions", "Live web sessions")?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(login_attempts.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            login_attempts,
            rate_limited,
            active_sessions,
        })
    }

    pub fn record_login(&self, outcome: &str) {
        self.login_attempts.with_label_values(&[outcome]).inc();
        if outcome == LOGIN_BLOCKED {
            self.rate_limited.inc();
        }
    }

    /// Text exposition of every collector
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Metrics tracking middleware
pub async fn metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let endpoint = normalize_endpoint(request.uri().path());

    let response = next.run(request).await;

    state
        .metrics
        .http_requests
        .with_label_values(&[&endpoint, response.status().as_str()])
        .inc();

    response
}

/// Normalize endpoint paths for consistent metrics
///
/// Static assets collapse to one label and hex or numeric segments are
/// replaced, so arbitrary URLs cannot blow up label cardinality.
fn normalize_endpoint(path: &str) -> String {
    if path.starts_with("/assets/") {
        return "/assets/:file".to_string();
    }

    path.split('/')
        .map(|seg| {
            if is_numeric(seg) || is_hex_id(seg) {
                ":id"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

// Session tokens and similar opaque identifiers.
fn is_hex_id(s: &str) -> bool {
    s.len() >= 16 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Check if a string is numeric (likely an ID)
fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/control/login"), "/control/login");
        assert_eq!(normalize_endpoint("/assets/main.abc123.js"), "/assets/:file");
        assert_eq!(
            normalize_endpoint("/dns-query/0123456789abcdef0123"),
            "/dns-query/:id"
        );
        assert_eq!(normalize_endpoint("/clients/42"), "/clients/:id");
        assert_eq!(normalize_endpoint("/"), "/");
    }

    #[test]
    fn test_is_numeric() {
        assert!(is_numeric("123"));
        assert!(!is_numeric("12a"));
        assert!(!is_numeric(""));
    }

    #[test]
    fn test_render_contains_collectors() {
        let metrics = Metrics::new().unwrap();
        metrics.record_login(LOGIN_BLOCKED);
        metrics.active_sessions.set(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("homeguard_login_attempts_total{outcome=\"blocked\"} 1"));
        assert!(text.contains("homeguard_auth_rate_limited_total 1"));
        assert!(text.contains("homeguard_active_sessions 3"));
    }
}
