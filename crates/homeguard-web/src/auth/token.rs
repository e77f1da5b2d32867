//! Session tokens and the on-disk session record format
//!
//! A token is 16 bytes from the OS random source. Clients only ever see its
//! lowercase hex form (32 characters) as a cookie value.
//!
//! A stored session record is a fixed 6-byte header followed by the login:
//!
//! ```text
//! +----------------------+-------------------+-------------------+
//! | expiry (u32 BE secs) | login len (u16 BE)| login (UTF-8)     |
//! +----------------------+-------------------+-------------------+
//! ```

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use thiserror::Error;

/// Length of a session token in bytes
pub const TOKEN_LEN: usize = 16;

/// Length of the fixed record header in bytes
pub const RECORD_HEADER_LEN: usize = 4 + 2;

/// The OS random source failed
#[derive(Debug, Error)]
#[error("Random source failure: {0}")]
pub struct RandomSourceError(pub String);

impl From<rand::Error> for RandomSourceError {
    fn from(err: rand::Error) -> Self {
        Self(err.to_string())
    }
}

/// Fill `buf` from the OS random source
pub fn fill_random(buf: &mut [u8]) -> Result<(), RandomSourceError> {
    OsRng.try_fill_bytes(buf)?;
    Ok(())
}

/// Random session identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken([u8; TOKEN_LEN]);

impl SessionToken {
    /// Generate a new token from the OS random source
    pub fn generate() -> Result<Self, RandomSourceError> {
        let mut bytes = [0u8; TOKEN_LEN];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Parse the 32-character hex form
    ///
    /// Any other length or a non-hex character yields `None`.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != TOKEN_LEN * 2 {
            return None;
        }

        let mut bytes = [0u8; TOKEN_LEN];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    /// Build a token from a raw storage key
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; TOKEN_LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Lowercase hex form, as sent to clients
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw bytes, used as the storage key
    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }
}

impl From<[u8; TOKEN_LEN]> for SessionToken {
    fn from(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// Only a prefix goes to logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({}..)", hex::encode(&self.0[..2]))
    }
}

/// Session record decoding and encoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Record too short: {0} bytes")]
    TooShort(usize),

    #[error("Login length mismatch: header says {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Login is not valid UTF-8")]
    InvalidLogin,

    #[error("Login too long: {0} bytes")]
    LoginTooLong(usize),

    #[error("Expiry out of range: {0}")]
    ExpiryOutOfRange(i64),
}

/// Decoded session record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Login of the session owner
    pub login: String,
    /// Expiry, in whole seconds
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Serialize into the fixed-header record format
    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        let secs = self.expires_at.timestamp();
        let expiry = u32::try_from(secs).map_err(|_| RecordError::ExpiryOutOfRange(secs))?;

        let login = self.login.as_bytes();
        let login_len =
            u16::try_from(login.len()).map_err(|_| RecordError::LoginTooLong(login.len()))?;

        let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + login.len());
        buf.extend_from_slice(&expiry.to_be_bytes());
        buf.extend_from_slice(&login_len.to_be_bytes());
        buf.extend_from_slice(login);

        Ok(buf)
    }

    /// Parse a stored record
    pub fn decode(data: &[u8]) -> Result<Self, RecordError> {
        if data.len() < RECORD_HEADER_LEN {
            return Err(RecordError::TooShort(data.len()));
        }

        let (header, tail) = data.split_at(RECORD_HEADER_LEN);
        let expiry = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let login_len = usize::from(u16::from_be_bytes([header[4], header[5]]));

        if tail.len() != login_len {
            return Err(RecordError::LengthMismatch {
                expected: login_len,
                actual: tail.len(),
            });
        }

        let login = std::str::from_utf8(tail)
            .map_err(|_| RecordError::InvalidLogin)?
            .to_string();

        let expires_at = DateTime::from_timestamp(i64::from(expiry), 0)
            .ok_or(RecordError::ExpiryOutOfRange(i64::from(expiry)))?;

        Ok(Self { login, expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generate_is_random() {
        let a = SessionToken::generate().unwrap();
        let b = SessionToken::generate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hex_form() {
        let token = SessionToken::from([0xab; TOKEN_LEN]);
        let hex = token.to_hex();

        assert_eq!(hex.len(), 32);
        assert_eq!(hex, "ab".repeat(16));
        assert_eq!(SessionToken::from_hex(&hex), Some(token));
        assert_eq!(SessionToken::from_hex(&hex.to_uppercase()), Some(token));
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(SessionToken::from_hex("").is_none());
        assert!(SessionToken::from_hex("abcd").is_none());
        assert!(SessionToken::from_hex(&"a".repeat(34)).is_none());
        assert!(SessionToken::from_hex(&"zz".repeat(16)).is_none());
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let token = SessionToken::from([0x12; TOKEN_LEN]);
        assert_eq!(format!("{token:?}"), "SessionToken(1212..)");
    }

    #[test]
    fn test_record_layout() {
        let record = SessionRecord {
            login: "name".to_string(),
            expires_at: DateTime::from_timestamp(0x01020304, 0).unwrap(),
        };

        let data = record.encode().unwrap();
        assert_eq!(data, vec![1, 2, 3, 4, 0, 4, b'n', b'a', b'm', b'e']);
        assert_eq!(SessionRecord::decode(&data).unwrap(), record);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(SessionRecord::decode(&[1, 2, 3]), Err(RecordError::TooShort(3)));
        assert_eq!(
            SessionRecord::decode(&[0, 0, 0, 1, 0, 5, b'a']),
            Err(RecordError::LengthMismatch {
                expected: 5,
                actual: 1
            })
        );
        assert_eq!(
            SessionRecord::decode(&[0, 0, 0, 1, 0, 1, 0xff]),
            Err(RecordError::InvalidLogin)
        );
    }

    #[test]
    fn test_encode_rejects_pre_epoch_expiry() {
        let record = SessionRecord {
            login: "a".to_string(),
            expires_at: DateTime::from_timestamp(-1, 0).unwrap(),
        };
        assert_eq!(record.encode(), Err(RecordError::ExpiryOutOfRange(-1)));
    }

    proptest! {
        #[test]
        fn decode_accepts_only_exact_length(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let result = SessionRecord::decode(&data);

            let well_formed = data.len() >= RECORD_HEADER_LEN
                && data.len() - RECORD_HEADER_LEN == usize::from(u16::from_be_bytes([data[4], data[5]]))
                && std::str::from_utf8(&data[RECORD_HEADER_LEN..]).is_ok();

            prop_assert_eq!(result.is_ok(), well_formed);
        }
    }
}
