//! Password hashing with Argon2id

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot hash password: {0}")]
    Hashing(password_hash::Error),
    #[error("Stored password hash is malformed: {0}")]
    MalformedHash(password_hash::Error),
}

#[cfg(not(test))]
fn hasher() -> Argon2<'static> {
    Argon2::default()
}

/// Cheapest allowed parameters, so the test suite doesn't spend its time in the key derivation
#[cfg(test)]
fn hasher() -> Argon2<'static> {
    use argon2::{Algorithm, Params, Version};

    let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, 1, None).unwrap();
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

/// Hashes the password into the PHC string format with a random salt
pub fn hash(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher()
        .hash_password(password.as_bytes(), &salt)
        .map_err(Error::Hashing)?;

    Ok(hash.to_string())
}

/// Checks the password against a PHC formatted hash
///
/// Returns `Ok(false)` on mismatch, errors are reserved for unusable hashes.
pub fn verify(password: &str, hash: &str) -> Result<bool, Error> {
    let hash = PasswordHash::new(hash).map_err(Error::MalformedHash)?;

    match hasher().verify_password(password.as_bytes(), &hash) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(err) => Err(Error::MalformedHash(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_password() {
        let hash = hash("password123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify("password123", &hash).unwrap());
    }

    #[test]
    fn wrong_password() {
        let hash = hash("password123").unwrap();
        assert!(!verify("wrongpassword", &hash).unwrap());
        assert!(!verify("", &hash).unwrap());
    }

    #[test]
    fn salts_differ() {
        assert_ne!(hash("password123").unwrap(), hash("password123").unwrap());
    }

    #[test]
    fn malformed_hash() {
        let err = verify("password123", "not-a-hash").unwrap_err();
        assert!(matches!(err, Error::MalformedHash(_)));
    }
}
