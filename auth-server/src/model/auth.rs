//! Session lifecycle
//!
//! `SessionManager` is the only owner of the signing secret. Everything that needs a token issued
//! or verified goes through it.

use chrono::{TimeDelta, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::sessions::Session;
use crate::model::token::{self, Claims, Secret, TokenError};
use crate::model::users::UserId;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("Session time-to-live must be a positive number of seconds, got {0}")]
    InvalidTtl(TimeDelta),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Issues, verifies and revokes sessions
#[derive(Debug)]
pub struct SessionManager {
    /// Token signing secret
    secret: Secret,
    /// Lifetime of issued sessions
    ttl: TimeDelta,
    /// Whether a verified token also needs a live session record
    verify_store: bool,
}

impl SessionManager {
    /// Creates the manager issuing sessions valid for `ttl`
    ///
    /// Store verification is enabled.
    pub fn new(secret: Secret, ttl: TimeDelta) -> Result<Self, Error> {
        if ttl.num_seconds() <= 0 {
            return Err(Error::InvalidTtl(ttl));
        }

        Ok(Self {
            secret,
            ttl,
            verify_store: true,
        })
    }

    /// Enables or disables checking the session records on every request
    ///
    /// With the check disabled tokens stay valid until they expire, even after logout.
    pub fn with_store_verification(mut self, enabled: bool) -> Self {
        self.verify_store = enabled;
        self
    }

    /// Lifetime of issued sessions
    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Whether the session records are checked on every request
    pub fn verifies_store(&self) -> bool {
        self.verify_store
    }

    /// Issues a new session for the user and stores it
    ///
    /// Every call creates an independent session, a user may have any number of them.
    pub async fn issue(
        &self,
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        user_id: UserId,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<Session, Error> {
        let now = Utc::now();
        let token = token::encode_at(user_id, &self.secret, self.ttl, now)?;
        let session = Session::create(db, user_id, token, client_ip, user_agent, now).await?;

        info!(%user_id, session_id = ?session.meta.id, expires_at = %session.expires_at, "Session issued");
        Ok(session)
    }

    /// Revokes all sessions of the user
    ///
    /// Returns the number of revoked sessions.
    pub async fn invalidate(
        &self,
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        user_id: UserId,
    ) -> Result<u64, Error> {
        let revoked = Session::revoke_all(db, user_id, Utc::now()).await?;

        info!(%user_id, revoked, "Sessions revoked");
        Ok(revoked)
    }

    /// Verifies the bearer token returning its claims
    pub fn decode_and_validate(&self, token: &str) -> Result<Claims, TokenError> {
        token::decode(token, &self.secret)
    }

    /// Looks up the live session of verified claims recording its use
    ///
    /// Returns `false` when the session no longer exists.
    pub async fn touch(
        &self,
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        claims: &Claims,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<bool, Error> {
        let live = Session::touch(
            db,
            claims.jti,
            claims.user_id,
            client_ip,
            user_agent,
            Utc::now(),
        )
        .await?;

        if !live {
            debug!(user_id = %claims.user_id, token_id = %claims.jti, "No live session for token");
        }

        Ok(live)
    }

    /// Manager used in tests
    #[cfg(test)]
    pub fn test() -> Self {
        let secret = Secret::new(TEST_SECRET).unwrap();
        Self::new(secret, TimeDelta::hours(24)).unwrap()
    }
}

/// Signing secret of `SessionManager::test`
#[cfg(test)]
pub const TEST_SECRET: &str = "test-secret-key";
