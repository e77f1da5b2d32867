//! Web user records
//!
//! [`UserStore`] owns every user known to the control plane. It is filled from
//! the configuration at startup and grows through "add user" (the install
//! wizard or the CLI). Each change is reported to a [`ConfigModifier`] so the
//! owning process can persist the list.

use super::password::{verify_dummy, Password};
use super::token::{fill_random, RandomSourceError};
use homeguard_core::{ConfigError, ConfigModifier, WebUserConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Case-sensitive login name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Login(String);

impl Login {
    pub fn new(login: impl Into<String>) -> Self {
        Self(login.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Login {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stable user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Random (version 4) identifier from the OS random source
    pub fn generate() -> Result<Self, RandomSourceError> {
        let mut bytes = [0u8; 16];
        fill_random(&mut bytes)?;
        Ok(Self(uuid::Builder::from_random_bytes(bytes).into_uuid()))
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A web user
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub login: Login,
    pub password: Password,
}

impl User {
    /// Create a user with a freshly generated id
    pub fn new(login: impl Into<Login>, password: Password) -> Result<Self, RandomSourceError> {
        Ok(Self {
            id: UserId::generate()?,
            login: login.into(),
            password,
        })
    }

    fn to_config(&self) -> WebUserConfig {
        WebUserConfig {
            name: self.login.to_string(),
            password: self.password.as_hash().to_string(),
        }
    }
}

impl From<String> for Login {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// User store errors
#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("User with login {0} already exists")]
    DuplicateLogin(Login),

    #[error("User with id {0} already exists")]
    DuplicateId(UserId),

    #[error("User id is empty")]
    EmptyId,

    #[error("Login is empty")]
    EmptyLogin,

    #[error("User not found")]
    NotFound,

    #[error(transparent)]
    RandomSource(#[from] RandomSourceError),

    #[error("Failed to persist users: {0}")]
    Persist(#[from] ConfigError),
}

#[derive(Default)]
struct Users {
    by_login: HashMap<Login, UserId>,
    by_id: HashMap<UserId, Arc<User>>,
}

impl Users {
    fn insert(&mut self, user: User) -> Result<(), UserStoreError> {
        if user.id.is_nil() {
            return Err(UserStoreError::EmptyId);
        }
        if user.login.as_str().is_empty() {
            return Err(UserStoreError::EmptyLogin);
        }
        if self.by_login.contains_key(&user.login) {
            return Err(UserStoreError::DuplicateLogin(user.login));
        }
        if self.by_id.contains_key(&user.id) {
            return Err(UserStoreError::DuplicateId(user.id));
        }

        self.by_login.insert(user.login.clone(), user.id);
        self.by_id.insert(user.id, Arc::new(user));

        Ok(())
    }

    fn remove(&mut self, login: &Login) {
        if let Some(id) = self.by_login.remove(login) {
            self.by_id.remove(&id);
        }
    }

    fn sorted(&self) -> Vec<Arc<User>> {
        let mut users: Vec<_> = self.by_id.values().cloned().collect();
        users.sort_by(|a, b| a.login.cmp(&b.login));
        users
    }
}

/// In-memory user store
pub struct UserStore {
    users: Mutex<Users>,
    modifier: Arc<dyn ConfigModifier>,
}

impl UserStore {
    /// Create an empty store
    pub fn new(modifier: Arc<dyn ConfigModifier>) -> Self {
        Self {
            users: Mutex::new(Users::default()),
            modifier,
        }
    }

    /// Build the store from configured users
    ///
    /// Loading does not notify the modifier; the list came from it.
    pub fn from_config(
        configured: &[WebUserConfig],
        modifier: Arc<dyn ConfigModifier>,
    ) -> Result<Self, UserStoreError> {
        let store = Self::new(modifier);
        {
            let mut users = store.lock();
            for u in configured {
                users.insert(User::new(u.name.as_str(), Password::from_hash(&u.password))?)?;
            }
        }

        tracing::info!(users = configured.len(), "Loaded web users");

        Ok(store)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Users> {
        self.users.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a user and notify the modifier
    ///
    /// If the modifier fails the user is removed again and the error returned.
    pub fn create(&self, user: User) -> Result<(), UserStoreError> {
        let login = user.login.clone();
        let snapshot = {
            let mut users = self.lock();
            users.insert(user)?;
            users.sorted()
        };

        let configured: Vec<_> = snapshot.iter().map(|u| u.to_config()).collect();
        if let Err(e) = self.modifier.apply(&configured) {
            self.lock().remove(&login);
            return Err(e.into());
        }

        tracing::info!(login = %login, "Added web user");

        Ok(())
    }

    /// Look up a user by login
    pub fn by_login(&self, login: &str) -> Result<Arc<User>, UserStoreError> {
        let users = self.lock();
        users
            .by_login
            .get(&Login::from(login))
            .and_then(|id| users.by_id.get(id))
            .cloned()
            .ok_or(UserStoreError::NotFound)
    }

    /// Look up a user by id
    pub fn by_id(&self, id: UserId) -> Result<Arc<User>, UserStoreError> {
        self.lock()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(UserStoreError::NotFound)
    }

    /// All users, sorted by login
    pub fn all(&self) -> Vec<Arc<User>> {
        self.lock().sorted()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().by_id.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    /// Check a login and plaintext password
    ///
    /// Blocks for the duration of the slow hash. An unknown login is checked
    /// against a throwaway hash so both failure paths take the same time.
    pub fn verify(&self, login: &str, password: &str) -> Option<Arc<User>> {
        // The lock is released before hashing.
        let user = self.by_login(login).ok();

        match user {
            Some(user) if user.password.authenticate(password) => Some(user),
            Some(_) => {
                tracing::debug!(login, "Wrong password");
                None
            }
            None => {
                verify_dummy(password);
                tracing::debug!(login, "Unknown login");
                None
            }
        }
    }
}
