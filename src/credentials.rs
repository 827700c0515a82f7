//! Password hashing for SnapStep accounts.
//!
//! New hashes are Argon2id PHC strings. Existing accounts carry bcrypt hashes written
//! by the API, and accounts seeded by older tooling an unsalted SHA-256 hex digest.
//! All three verify, and [`needs_rehash`] flags the older two so the caller can
//! upgrade the stored value after a successful login.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("stored password hash has an unrecognized format")]
    UnrecognizedHash,
    #[error("password hashing failed: {0}")]
    Hashing(argon2::password_hash::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordScheme {
    Argon2,
    Bcrypt,
    LegacySha256,
}

impl PasswordScheme {
    /// Detects the scheme from the stored hash's format.
    pub fn detect(stored: &str) -> Option<Self> {
        if stored.starts_with("$argon2") {
            Some(Self::Argon2)
        } else if ["$2a$", "$2b$", "$2y$"].iter().any(|tag| stored.starts_with(tag)) {
            Some(Self::Bcrypt)
        } else if stored.len() == 64 && stored.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self::LegacySha256)
        } else {
            None
        }
    }
}

/// Hashes `password` with Argon2id and a random salt.
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(CredentialError::Hashing)?;
    Ok(hash.to_string())
}

/// Checks `password` against a stored hash of any supported scheme.
///
/// Returns `Ok(false)` on mismatch; errors are reserved for hashes that cannot be
/// interpreted at all.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, CredentialError> {
    match PasswordScheme::detect(stored).ok_or(CredentialError::UnrecognizedHash)? {
        PasswordScheme::Argon2 => {
            let parsed = PasswordHash::new(stored).map_err(|_| CredentialError::UnrecognizedHash)?;
            if parsed.hash.is_none() {
                return Err(CredentialError::UnrecognizedHash);
            }
            match Argon2::default().verify_password(password.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(argon2::password_hash::Error::Password) => Ok(false),
                Err(_) => Err(CredentialError::UnrecognizedHash),
            }
        }
        PasswordScheme::Bcrypt => {
            bcrypt::verify(password, stored).map_err(|_| CredentialError::UnrecognizedHash)
        }
        PasswordScheme::LegacySha256 => {
            let digest = sha256_hex(password);
            Ok(constant_time_eq(
                digest.as_bytes(),
                stored.to_ascii_lowercase().as_bytes(),
            ))
        }
    }
}

/// True when the stored hash should be replaced by a fresh [`hash_password`] result.
pub fn needs_rehash(stored: &str) -> bool {
    matches!(
        PasswordScheme::detect(stored),
        Some(PasswordScheme::Bcrypt | PasswordScheme::LegacySha256)
    )
}

fn sha256_hex(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
