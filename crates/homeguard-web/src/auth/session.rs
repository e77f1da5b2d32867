//! Session store
//!
//! Sessions live in an in-memory index guarded by a mutex, and every change
//! that matters across restarts is written through to a [`SessionBackend`].
//! Both happen under the index lock; a crash between the two steps can only
//! lose the most recent renewal, never the session itself.

use super::token::{RandomSourceError, RecordError, SessionRecord, SessionToken};
use super::users::{Login, UserStore};
use chrono::{DateTime, Duration, Utc};
use homeguard_core::Clock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Session store errors
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("Session backend error: {0}")]
    Backend(String),

    #[error("Invalid session record: {0}")]
    Record(#[from] RecordError),

    #[error(transparent)]
    RandomSource(#[from] RandomSourceError),
}

impl From<sled::Error> for SessionStoreError {
    fn from(err: sled::Error) -> Self {
        SessionStoreError::Backend(err.to_string())
    }
}

/// Persistent key-value storage for session records
///
/// Keys are raw 16-byte tokens, values are encoded [`SessionRecord`]s.
pub trait SessionBackend: Send + Sync {
    fn put(&self, token: &SessionToken, record: &[u8]) -> Result<(), SessionStoreError>;

    /// Removing an absent key is not an error.
    fn remove(&self, key: &[u8]) -> Result<(), SessionStoreError>;

    /// Every stored key and value, including malformed ones
    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SessionStoreError>;

    /// Block until all writes are durable
    fn flush(&self) -> Result<(), SessionStoreError>;
}

/// sled-backed session storage
pub struct SledBackend {
    db: sled::Db,
}

impl SledBackend {
    /// Open or create the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SessionStoreError> {
        let db = sled::open(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "Opened session store");
        Ok(Self { db })
    }

    /// Store that is deleted when dropped
    pub fn temporary() -> Result<Self, SessionStoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl SessionBackend for SledBackend {
    fn put(&self, token: &SessionToken, record: &[u8]) -> Result<(), SessionStoreError> {
        self.db.insert(token.as_bytes(), record)?;
        Ok(())
    }

    fn remove(&self, key: &[u8]) -> Result<(), SessionStoreError> {
        self.db.remove(key)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SessionStoreError> {
        let mut entries = Vec::new();
        for item in self.db.iter() {
            let (key, value) = item?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn flush(&self) -> Result<(), SessionStoreError> {
        self.db.flush()?;
        Ok(())
    }
}

/// A live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: SessionToken,
    pub login: Login,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn record(&self) -> SessionRecord {
        SessionRecord {
            login: self.login.to_string(),
            expires_at: self.expires_at,
        }
    }
}

/// Outcome of [`SessionStore::check_session`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCheck {
    /// Session is live; its expiry has been pushed forward
    Valid(Session),
    /// Session had expired and has now been removed
    Expired,
    /// No such session
    NotFound,
}

/// A stored entry as seen by administrative tooling
#[derive(Debug)]
pub struct StoredSession {
    pub key: Vec<u8>,
    pub record: Result<SessionRecord, RecordError>,
}

impl StoredSession {
    /// Whether loading would discard this entry on time or format grounds
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        SessionToken::from_slice(&self.key).is_none()
            || self.record.as_ref().map_or(true, |r| r.expires_at <= now)
    }
}

/// Read every entry of a backend without interpreting it
pub fn scan_records(backend: &dyn SessionBackend) -> Result<Vec<StoredSession>, SessionStoreError> {
    Ok(backend
        .scan()?
        .into_iter()
        .map(|(key, value)| StoredSession {
            record: SessionRecord::decode(&value),
            key,
        })
        .collect())
}

/// Session store with write-through persistence
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionToken, Session>>,
    backend: Box<dyn SessionBackend>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionStore {
    /// Create a store over `backend`
    ///
    /// Nothing is read from the backend until [`SessionStore::load_all`].
    pub fn new(backend: Box<dyn SessionBackend>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            backend,
            clock,
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionToken, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, SessionStoreError> {
        let secs = now
            .checked_add_signed(self.ttl)
            .map(|at| at.timestamp())
            .ok_or(RecordError::ExpiryOutOfRange(i64::MAX))?;

        // Records carry whole seconds.
        DateTime::from_timestamp(secs, 0).ok_or_else(|| RecordError::ExpiryOutOfRange(secs).into())
    }

    /// Populate the index from the backend
    ///
    /// Entries that fail to decode, have expired or belong to an unknown user
    /// are deleted from the backend. Returns the number of sessions loaded.
    pub fn load_all(&self, users: &UserStore) -> Result<usize, SessionStoreError> {
        let now = self.clock.now();
        let mut sessions = self.lock();
        let mut dropped = 0usize;

        for stored in scan_records(self.backend.as_ref())? {
            let session = match (SessionToken::from_slice(&stored.key), stored.record) {
                (Some(token), Ok(record))
                    if record.expires_at > now && users.by_login(&record.login).is_ok() =>
                {
                    Session {
                        token,
                        login: Login::new(record.login),
                        expires_at: record.expires_at,
                    }
                }
                (_, record) => {
                    if let Err(e) = record {
                        tracing::debug!(error = %e, "Dropping corrupt session record");
                    }
                    self.backend.remove(&stored.key)?;
                    dropped += 1;
                    continue;
                }
            };

            sessions.insert(session.token, session);
        }

        if dropped > 0 {
            self.backend.flush()?;
        }

        tracing::info!(loaded = sessions.len(), dropped, "Loaded sessions");

        Ok(sessions.len())
    }

    /// Create and persist a session for `login`
    ///
    /// The record is durable before this returns.
    pub fn new_session(&self, login: &Login) -> Result<Session, SessionStoreError> {
        let expires_at = self.expiry_from(self.clock.now())?;

        let mut sessions = self.lock();
        let mut token = SessionToken::generate()?;
        while sessions.contains_key(&token) {
            token = SessionToken::generate()?;
        }

        let session = Session {
            token,
            login: login.clone(),
            expires_at,
        };

        self.backend.put(&session.token, &session.record().encode()?)?;
        self.backend.flush()?;

        sessions.insert(session.token, session.clone());
        drop(sessions);

        tracing::debug!(login = %login, token = ?session.token, "Created session");

        Ok(session)
    }

    /// Look up a session, expiring or renewing it
    ///
    /// Renewal always moves the in-memory expiry to `now + ttl`, but the
    /// backend is only written when that changes the UTC calendar day of the
    /// expiry, so an active session costs at most one write per day.
    ///
    /// Backend writes happen under the index lock, so a concurrent
    /// [`SessionStore::delete_by_token`] cannot be undone by a late renewal.
    pub fn check_session(&self, token: &SessionToken) -> SessionCheck {
        let now = self.clock.now();
        let mut sessions = self.lock();

        let Some(session) = sessions.get_mut(token) else {
            return SessionCheck::NotFound;
        };

        if session.expires_at <= now {
            sessions.remove(token);
            if let Err(e) = self.backend.remove(token.as_bytes()) {
                tracing::warn!(error = %e, "Failed to remove expired session");
            }
            tracing::debug!(token = ?token, "Session expired");

            return SessionCheck::Expired;
        }

        let new_expiry = match self.expiry_from(now) {
            Ok(at) => at,
            Err(e) => {
                tracing::warn!(error = %e, "Session not renewed");
                return SessionCheck::Valid(session.clone());
            }
        };
        let persist = session.expires_at.date_naive() != new_expiry.date_naive();
        session.expires_at = new_expiry;

        if persist {
            let written = session
                .record()
                .encode()
                .map_err(SessionStoreError::from)
                .and_then(|record| self.backend.put(token, &record));
            if let Err(e) = written {
                tracing::warn!(error = %e, "Failed to persist session renewal");
            }
        }

        SessionCheck::Valid(session.clone())
    }

    /// Remove a session; absent tokens are ignored
    pub fn delete_by_token(&self, token: &SessionToken) -> Result<(), SessionStoreError> {
        let mut sessions = self.lock();
        sessions.remove(token);
        self.backend.remove(token.as_bytes())
    }

    /// Number of sessions in the index
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Flush the backend
    pub fn close(&self) -> Result<(), SessionStoreError> {
        self.backend.flush()?;
        tracing::debug!(sessions = self.len(), "Session store closed");
        Ok(())
    }
}
