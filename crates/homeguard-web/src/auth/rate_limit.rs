//! Failed-login rate limiter
//!
//! Failures are counted per caller identity (the remote address). After
//! `max_attempts` failures the identity is blocked for `block_duration`,
//! measured from the failure that reached the threshold. Records are kept in
//! memory only and are swept lazily on every [`RateLimiter::check`].

use chrono::{DateTime, Duration, Utc};
use homeguard_core::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// How long a failure is remembered when it does not lead to a block
pub const FAILED_AUTH_TTL_SECS: i64 = 60;

/// Failure tracking for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAuthRecord {
    pub count: u32,
    pub blocked_until: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

/// Per-identity failed authentication limiter
pub struct RateLimiter {
    failed: Mutex<HashMap<String, FailedAuthRecord>>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    block_duration: Duration,
}

impl RateLimiter {
    /// Create a limiter; `max_attempts == 0` disables it
    pub fn new(clock: Arc<dyn Clock>, max_attempts: u32, block_duration: Duration) -> Self {
        Self {
            failed: Mutex::new(HashMap::new()),
            clock,
            max_attempts,
            block_duration,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, FailedAuthRecord>> {
        self.failed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Remaining block time for `identity`
    ///
    /// Zero or negative means the identity may try again.
    pub fn check(&self, identity: &str) -> Duration {
        if !self.is_enabled() {
            return Duration::zero();
        }

        let now = self.clock.now();
        let mut failed = self.lock();
        failed.retain(|_, r| r.expires_at > now);

        failed
            .get(identity)
            .and_then(|r| r.blocked_until)
            .map_or_else(Duration::zero, |until| until - now)
    }

    /// Count a failed attempt from `identity`
    pub fn record_failure(&self, identity: &str) {
        if !self.is_enabled() {
            return;
        }

        let now = self.clock.now();
        let fresh = || FailedAuthRecord {
            count: 0,
            blocked_until: None,
            expires_at: now + Duration::seconds(FAILED_AUTH_TTL_SECS),
        };

        let mut failed = self.lock();
        let record = failed.entry(identity.to_string()).or_insert_with(fresh);
        if record.expires_at <= now {
            *record = fresh();
        }

        record.count = record.count.saturating_add(1);

        if record.blocked_until.is_none() && record.count >= self.max_attempts {
            let until = now + self.block_duration;
            record.blocked_until = Some(until);
            record.expires_at = record.expires_at.max(until);

            tracing::warn!(
                identity,
                attempts = record.count,
                blocked_secs = self.block_duration.num_seconds(),
                "Too many failed login attempts, blocking"
            );
        }
    }

    /// Forget all failures of `identity`
    pub fn clear(&self, identity: &str) {
        self.lock().remove(identity);
    }

    /// Snapshot of the record for `identity`, if one is live
    pub fn record(&self, identity: &str) -> Option<FailedAuthRecord> {
        let now = self.clock.now();
        self.lock()
            .get(identity)
            .filter(|r| r.expires_at > now)
            .cloned()
    }

    /// Number of tracked identities, including lapsed ones not yet swept
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }
}

/// Whole seconds left in a block, rounded up
pub fn retry_after_secs(left: Duration) -> i64 {
    (left.num_milliseconds() + 999) / 1000
}
