/// Password hashing and verification
///
/// New hashes use Argon2id following OWASP recommendations:
/// - Memory: 64 MB
/// - Iterations: 3
/// - Parallelism: 4 threads
/// - Salt: 16 bytes random
/// - Output: 32 bytes hash
///
/// Verification also accepts bcrypt hashes (`$2a$`, `$2b$`, `$2y$`), which is
/// what appliance configuration files written by older firmware contain.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,

    #[error("Password must be at least {0} characters long")]
    TooShort(usize),
}

/// Minimum length of a new password, in characters
pub const PASSWORD_MIN_CHARS: usize = 8;

/// Password hashing configuration
///
/// These parameters are tuned for security while maintaining acceptable performance.
/// Increasing memory or iterations improves security but slows down hashing.
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    /// Memory cost in KB (default: 65536 = 64 MB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 3)
    pub time_cost: u32,
    /// Parallelism (threads, default: 4)
    pub parallelism: u32,
    /// Output length in bytes (default: 32)
    pub output_len: Option<usize>,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
            output_len: Some(32),
        }
    }
}

impl PasswordConfig {
    fn to_params(&self) -> Result<Params, PasswordError> {
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            self.output_len,
        )
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))
    }
}

/// Hash a plaintext password using Argon2id with the default parameters
///
/// Returns a PHC string (algorithm, parameters, salt and hash), safe to store
/// in the configuration file as-is.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    hash_password_with_config(password, &PasswordConfig::default())
}

/// Hash a password with custom configuration
pub fn hash_password_with_config(
    password: &str,
    config: &PasswordConfig,
) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let params = config.to_params()?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

    Ok(password_hash.to_string())
}

/// Verify a plaintext password against a stored hash
///
/// # Returns
///
/// * `Ok(true)` - Password matches
/// * `Ok(false)` - Password does not match
/// * `Err(PasswordError)` - The stored hash is not a recognized format
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    if is_bcrypt_hash(hash) {
        return bcrypt::verify(password, hash)
            .map_err(|e| PasswordError::VerificationFailed(e.to_string()));
    }

    let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

    // Parameters are taken from the PHC string, not from `Argon2::default()`.
    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}

fn is_bcrypt_hash(hash: &str) -> bool {
    ["$2a$", "$2b$", "$2y$"].iter().any(|p| hash.starts_with(p))
}

/// Check that a new password is acceptable
pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    if password.chars().count() < PASSWORD_MIN_CHARS {
        return Err(PasswordError::TooShort(PASSWORD_MIN_CHARS));
    }

    Ok(())
}

/// A stored password hash
///
/// The hash never leaves this type except through [`Password::as_hash`], which
/// exists for writing the configuration file back.
#[derive(Clone, PartialEq, Eq)]
pub struct Password {
    hash: String,
}

impl Password {
    /// Wrap an existing hash
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    /// Hash a plaintext password with the default parameters
    pub fn hash(plaintext: &str) -> Result<Self, PasswordError> {
        Ok(Self::from_hash(hash_password(plaintext)?))
    }

    pub fn hash_with_config(plaintext: &str, config: &PasswordConfig) -> Result<Self, PasswordError> {
        Ok(Self::from_hash(hash_password_with_config(plaintext, config)?))
    }

    /// Check `plaintext` against the stored hash
    ///
    /// A malformed stored hash never authenticates.
    pub fn authenticate(&self, plaintext: &str) -> bool {
        match verify_password(plaintext, &self.hash) {
            Ok(ok) => ok,
            Err(e) => {
                tracing::debug!(error = %e, "Stored password hash rejected");
                false
            }
        }
    }

    /// The stored hash string
    pub fn as_hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

/// A hash of a random throwaway password
///
/// Verifying an unknown login runs against this hash so that it costs as much
/// as verifying a known login with a wrong password.
pub fn dummy_password() -> &'static Password {
    static DUMMY: OnceLock<Password> = OnceLock::new();

    DUMMY.get_or_init(|| {
        let mut seed = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut seed);

        // An empty hash still never authenticates, it just loses the timing cover.
        Password::hash(&hex::encode(seed)).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to compute dummy password hash");
            Password::from_hash(String::new())
        })
    })
}

#[cfg(test)]
thread_local! {
    pub(crate) static DUMMY_CHECKS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Spend one full verification on the throwaway hash; always `false`
pub fn verify_dummy(password: &str) -> bool {
    #[cfg(test)]
    DUMMY_CHECKS.with(|n| n.set(n.get() + 1));

    dummy_password().authenticate(password)
}
