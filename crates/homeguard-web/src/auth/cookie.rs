//! Cookie and Basic credential helpers

use super::token::SessionToken;
use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Duration, Utc};

/// Name of the session cookie
pub const SESSION_COOKIE_NAME: &str = "agh_session";

/// Client-side lifetime of the session cookie
///
/// Independent of the server-side session TTL, which is authoritative.
pub const COOKIE_TTL_DAYS: i64 = 365;

/// Value of the first cookie named `cookie_name` across all Cookie headers
pub fn get_cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    for raw in headers.get_all(header::COOKIE) {
        let Ok(raw) = raw.to_str() else {
            continue;
        };
        for part in raw.split(';') {
            let Some((name, value)) = part.trim().split_once('=') else {
                continue;
            };
            if name == cookie_name {
                return Some(value.trim_matches('"').to_string());
            }
        }
    }
    None
}

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `Set-Cookie` value for a new session
pub fn build_session_cookie(token: &SessionToken, now: DateTime<Utc>) -> String {
    format!(
        "{name}={value}; Path=/; Expires={expires}; HttpOnly; SameSite=Lax",
        name = SESSION_COOKIE_NAME,
        value = token.to_hex(),
        expires = http_date(now + Duration::days(COOKIE_TTL_DAYS)),
    )
}

/// `Set-Cookie` value that removes the session cookie
pub fn build_session_cookie_clear() -> String {
    format!(
        "{name}=; Path=/; Expires={expires}; HttpOnly; SameSite=Lax",
        name = SESSION_COOKIE_NAME,
        expires = http_date(DateTime::UNIX_EPOCH),
    )
}

/// Credentials from an `Authorization: Basic` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub login: String,
    pub password: String,
}

/// The Basic header was present but could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedBasic;

/// Parse `Authorization: Basic`
///
/// Returns `Ok(None)` when there is no Authorization header or it uses a
/// different scheme.
pub fn parse_basic_auth(headers: &HeaderMap) -> Result<Option<BasicCredentials>, MalformedBasic> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| MalformedBasic)?;

    let Some((scheme, encoded)) = value.split_once(' ') else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Ok(None);
    }

    let decoded = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| MalformedBasic)?;
    let decoded = String::from_utf8(decoded).map_err(|_| MalformedBasic)?;
    let (login, password) = decoded.split_once(':').ok_or(MalformedBasic)?;

    Ok(Some(BasicCredentials {
        login: login.to_string(),
        password: password.to_string(),
    }))
}
