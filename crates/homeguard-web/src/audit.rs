//! Security audit logging for authentication events
//!
//! All audit events are logged at INFO level with the "audit" target,
//! making them easy to filter and route to security monitoring systems.
//! Each record carries the event serialized as JSON in the `event` field.
//!
//! # Example
//!
//! ```ignore
//! use homeguard_web::audit::{AuditEvent, audit_log};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     login: "admin".to_string(),
//!     ip_address: Some("192.168.1.1".to_string()),
//!     user_agent: Some("Mozilla/5.0...".to_string()),
//! });
//! ```

use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::info;

/// Security audit events for authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Successful login through the login endpoint
    LoginSuccess {
        login: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Failed login through the login endpoint
    LoginFailure {
        login: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Login refused because the caller is rate limited
    LoginBlocked {
        ip_address: Option<String>,
        retry_after_secs: i64,
    },

    /// Failed HTTP Basic authentication
    BasicAuthFailure {
        login: String,
        ip_address: Option<String>,
    },

    /// Session deleted by the user
    Logout { ip_address: Option<String> },

    /// User added through the install endpoint
    UserCreated {
        login: String,
        ip_address: Option<String>,
    },
}

impl AuditEvent {
    fn message(&self) -> &'static str {
        match self {
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::LoginBlocked { .. } => "Login blocked",
            AuditEvent::BasicAuthFailure { .. } => "Basic authentication failed",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::UserCreated { .. } => "User created",
        }
    }

    fn ip_address(&self) -> Option<&str> {
        match self {
            AuditEvent::LoginSuccess { ip_address, .. }
            | AuditEvent::LoginFailure { ip_address, .. }
            | AuditEvent::LoginBlocked { ip_address, .. }
            | AuditEvent::BasicAuthFailure { ip_address, .. }
            | AuditEvent::Logout { ip_address }
            | AuditEvent::UserCreated { ip_address, .. } => ip_address.as_deref(),
        }
    }
}

/// Log a security audit event with structured fields
pub fn audit_log(event: &AuditEvent) {
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    info!(
        target: "audit",
        timestamp = %Utc::now(),
        event = %event_json,
        ip_address = ?event.ip_address(),
        "{}",
        event.message()
    );
}

/// Client address for logging
///
/// Forwarding headers (`X-Real-IP`, then the first valid `X-Forwarded-For`
/// entry) are only honored when the socket peer is a trusted proxy. The
/// result must never be used for access decisions.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trusted: &[IpAddr]) -> Option<IpAddr> {
    let peer = peer?;
    if !trusted.contains(&peer) {
        return Some(peer);
    }

    let header_ip = |name: &str| -> Option<IpAddr> {
        headers
            .get(name)?
            .to_str()
            .ok()?
            .split(',')
            .find_map(|s| s.trim().parse().ok())
    };

    header_ip("x-real-ip")
        .or_else(|| header_ip("x-forwarded-for"))
        .or(Some(peer))
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginFailure {
            login: "admin".to_string(),
            reason: "invalid credentials".to_string(),
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: None,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"login_failure\""));
        assert!(json.contains("admin"));
        assert_eq!(event.ip_address(), Some("192.168.1.1"));
    }

    #[test]
    fn test_audit_log_does_not_panic() {
        audit_log(&AuditEvent::LoginBlocked {
            ip_address: None,
            retry_after_secs: 60,
        });
        audit_log(&AuditEvent::Logout {
            ip_address: Some("10.0.0.2".to_string()),
        });
    }

    #[test]
    fn test_client_ip_untrusted_peer_ignores_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.1".parse().unwrap());

        assert_eq!(
            client_ip(&headers, Some(ip("192.0.2.7")), &[]),
            Some(ip("192.0.2.7"))
        );
    }

    #[test]
    fn test_client_ip_trusted_proxy() {
        let proxy = ip("127.0.0.1");
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "garbage, 203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        assert_eq!(
            client_ip(&headers, Some(proxy), &[proxy]),
            Some(ip("203.0.113.1"))
        );

        headers.insert("x-real-ip", "198.51.100.9".parse().unwrap());
        assert_eq!(
            client_ip(&headers, Some(proxy), &[proxy]),
            Some(ip("198.51.100.9"))
        );

        assert_eq!(
            client_ip(&HeaderMap::new(), Some(proxy), &[proxy]),
            Some(proxy)
        );
    }

    #[test]
    fn test_extract_user_agent() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            "Mozilla/5.0 (Test)".parse().unwrap(),
        );

        assert_eq!(
            extract_user_agent(&headers),
            Some("Mozilla/5.0 (Test)".to_string())
        );
        assert_eq!(extract_user_agent(&HeaderMap::new()), None);
    }
}
