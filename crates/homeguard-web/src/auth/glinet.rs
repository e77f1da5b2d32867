//! GL-Inet compatibility mode
//!
//! When embedded in a GL-Inet router, the router's own web UI handles logins.
//! For every session it writes a file `<prefix><token>` whose trailing four
//! bytes are a native-endian `u32` Unix timestamp, and hands the token to the
//! browser in the `Admin-Token` cookie. A request is authenticated when that
//! file exists and the timestamp is at most [`GLINET_TOKEN_TIMEOUT_SECS`] old.
//!
//! This module only reads those files; it never creates or removes them.

use homeguard_core::Clock;
use std::fs::File;
use std::io::Read;
use std::sync::Arc;

/// Cookie set by the vendor web UI
pub const GLINET_COOKIE_NAME: &str = "Admin-Token";

/// Lifetime of a vendor token, counted from the stored timestamp
pub const GLINET_TOKEN_TIMEOUT_SECS: u64 = 3600;

/// Upper bound on how much of a token file is read
pub const MAX_TOKEN_FILE_SIZE: u64 = 1024 * 1024;

/// Validates vendor token files
pub struct GlinetChecker {
    prefix: String,
    clock: Arc<dyn Clock>,
}

impl GlinetChecker {
    pub fn new(prefix: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            prefix: prefix.into(),
            clock,
        }
    }

    /// Whether `token` names a live vendor token file
    ///
    /// Any I/O or format problem counts as "not authenticated".
    pub fn is_authenticated(&self, token: &str) -> bool {
        if !is_valid_token(token) {
            tracing::debug!("Rejected malformed vendor token");
            return false;
        }

        let path = format!("{}{}", self.prefix, token);
        let issued = match read_token_date(&path) {
            Ok(Some(ts)) => u64::from(ts),
            Ok(None) => {
                tracing::debug!(path = %path, "Vendor token file too short");
                return false;
            }
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "Vendor token file unreadable");
                return false;
            }
        };

        let now = self.clock.now().timestamp();
        let Ok(now) = u64::try_from(now) else {
            return false;
        };

        now <= issued + GLINET_TOKEN_TIMEOUT_SECS
    }
}

// The token becomes part of a path.
fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && !token.contains("..")
        && !token.contains(['/', '\\', '\0'])
}

/// Read the trailing timestamp of a token file
fn read_token_date(path: &str) -> std::io::Result<Option<u32>> {
    let mut data = Vec::new();
    File::open(path)?
        .take(MAX_TOKEN_FILE_SIZE)
        .read_to_end(&mut data)?;

    let Some(tail) = data.len().checked_sub(4).map(|start| &data[start..]) else {
        return Ok(None);
    };

    Ok(Some(u32::from_ne_bytes([tail[0], tail[1], tail[2], tail[3]])))
}
