//! Session token codec
//!
//! Session tokens are HMAC signed JWTs carrying the owning user id and the standard temporal
//! claims. Validity is fully derivable from the token itself and the signing secret - the codec
//! performs no I/O.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::users::UserId;

/// Algorithm used to sign issued tokens
const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Algorithms accepted when verifying a token
///
/// Restricted to the HMAC family, tokens declaring any other algorithm are rejected before their
/// signature is even looked at.
const ACCEPTED_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,
    #[error("Invalid token: {0}")]
    Invalid(String),
    #[error("Token time-to-live must be a positive number of seconds, got {0}")]
    InvalidTtl(TimeDelta),
    #[error("Cannot sign token")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("{0} environment variable is not set")]
    MissingEnv(String),
    #[error("Signing secret is empty")]
    Empty,
}

/// Symmetric key signing the session tokens
///
/// Loaded once on startup and never changed afterwards. The key material never leaves the
/// process - `Debug` output is redacted and the type is not serializable.
#[derive(Clone)]
pub struct Secret(Arc<[u8]>);

impl Secret {
    /// Creates the secret from raw key material
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self, SecretError> {
        let key = key.into();
        if key.is_empty() {
            return Err(SecretError::Empty);
        }

        Ok(Self(key.into()))
    }

    /// Reads the secret from the environment variable `var`
    pub fn from_env(var: &str) -> Result<Self, SecretError> {
        let key = std::env::var_os(var)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| SecretError::MissingEnv(var.to_owned()))?;

        Self::new(key.into_encoded_bytes())
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(&self.0)
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(&self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Payload of the session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User authorized by this token
    pub user_id: UserId,
    /// Issued at, Unix seconds
    pub iat: i64,
    /// Not valid before, Unix seconds
    pub nbf: i64,
    /// Expiration, Unix seconds
    pub exp: i64,
    /// Token id, links the token with its session record
    pub jti: Uuid,
}

impl Claims {
    /// Claims of a token issued at `now`, valid for `ttl`
    pub fn new(user_id: UserId, now: DateTime<Utc>, ttl: TimeDelta) -> Self {
        let now = now.timestamp();
        Self {
            user_id,
            iat: now,
            nbf: now,
            exp: now.saturating_add(ttl.num_seconds()),
            jti: Uuid::new_v4(),
        }
    }

    /// Expiration as a timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Freshly signed token with the bookkeeping data its session needs
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedToken {
    /// Signed token string
    pub token: String,
    /// The `jti` claim
    pub token_id: Uuid,
    /// The `exp` claim
    pub expires_at: DateTime<Utc>,
}

/// Signs a new token for `user_id` valid for `ttl` starting now
#[cfg(test)]
pub fn encode(user_id: UserId, secret: &Secret, ttl: TimeDelta) -> Result<EncodedToken, TokenError> {
    encode_at(user_id, secret, ttl, Utc::now())
}

/// Signs a new token for `user_id` valid for `ttl` starting at `now`
pub fn encode_at(
    user_id: UserId,
    secret: &Secret,
    ttl: TimeDelta,
    now: DateTime<Utc>,
) -> Result<EncodedToken, TokenError> {
    if ttl.num_seconds() <= 0 {
        return Err(TokenError::InvalidTtl(ttl));
    }

    let claims = Claims::new(user_id, now, ttl);
    let expires_at = claims.expires_at().ok_or(TokenError::InvalidTtl(ttl))?;
    let token = sign(&claims, secret)?;

    Ok(EncodedToken {
        token,
        token_id: claims.jti,
        expires_at,
    })
}

/// Signs arbitrary claims
pub(crate) fn sign(claims: &Claims, secret: &Secret) -> Result<String, TokenError> {
    jsonwebtoken::encode(&Header::new(SIGNING_ALGORITHM), claims, &secret.encoding_key())
        .map_err(TokenError::Signing)
}

/// Verifies the token against the current time
pub fn decode(token: &str, secret: &Secret) -> Result<Claims, TokenError> {
    decode_at(token, secret, Utc::now())
}

/// Verifies the token returning its claims
///
/// The signature is verified first, so a token is reported as `Expired` only when it is
/// otherwise authentic. A token is expired at its `exp` second.
pub fn decode_at(token: &str, secret: &Secret, now: DateTime<Utc>) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(SIGNING_ALGORITHM);
    validation.algorithms = ACCEPTED_ALGORITHMS.to_vec();
    validation.leeway = 0;
    // Temporal claims are checked below against `now`
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.set_required_spec_claims(&["exp", "nbf"]);

    let claims = jsonwebtoken::decode::<Claims>(token, &secret.decoding_key(), &validation)
        .map_err(|err| TokenError::Invalid(err.to_string()))?
        .claims;

    let now = now.timestamp();
    if now >= claims.exp {
        return Err(TokenError::Expired);
    }

    if now < claims.nbf {
        return Err(TokenError::Invalid("token is not valid yet".to_owned()));
    }

    Ok(claims)
}
