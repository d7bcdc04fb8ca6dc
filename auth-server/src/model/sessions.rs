//! Login sessions storage

use async_graphql::{Object, scalar};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::Type;
use uuid::Uuid;

use crate::model::record::RecordMeta;
use crate::model::token::EncodedToken;
use crate::model::users::UserId;

/// Newtype for session id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct SessionId(i64);

scalar!(SessionId);

/// Newtype for session token string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    #[cfg(test)]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Session data
///
/// The bearer token itself is not stored, it is only known on the session returned right after
/// issuing. Stored sessions are matched with tokens by `token_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    #[serde(flatten)]
    pub meta: RecordMeta<SessionId>,
    /// User ID for this session
    pub user_id: UserId,
    /// Session token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<SessionToken>,
    /// Id of the token (its `jti` claim)
    #[serde(skip)]
    pub token_id: Uuid,
    /// Session expiration time, always equal to the token expiration
    pub expires_at: DateTime<Utc>,
    /// Last time the session was used
    pub last_used_at: DateTime<Utc>,
    /// Client address of the last use
    pub last_used_ip: String,
    /// Client user agent of the last use
    pub last_used_loc: String,
}

/// Row layout of the `sessions` table
type SessionRow = (
    SessionId,
    UserId,
    Uuid,
    DateTime<Utc>,
    DateTime<Utc>,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

impl Session {
    /// Stores a session for a freshly encoded token
    ///
    /// The session is considered used at `now` by the issuing client.
    pub async fn create(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        user_id: UserId,
        token: EncodedToken,
        client_ip: &str,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let EncodedToken {
            token,
            token_id,
            expires_at,
        } = token;

        let result = sqlx::query(
            "insert into sessions (
                user_id, token_id, expires_at, last_used_at, last_used_ip, last_used_loc,
                created_at, updated_at
            ) values (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(token_id)
        .bind(expires_at)
        .bind(now)
        .bind(client_ip)
        .bind(user_agent)
        .bind(now)
        .bind(now)
        .execute(db)
        .await?;

        Ok(Self {
            meta: RecordMeta::created(SessionId(result.last_insert_rowid()), now),
            user_id,
            token: Some(SessionToken(token)),
            token_id,
            expires_at,
            last_used_at: now,
            last_used_ip: client_ip.to_owned(),
            last_used_loc: user_agent.to_owned(),
        })
    }

    /// Fetches live sessions of the user, oldest first
    pub async fn fetch_for_user(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        user_id: UserId,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "select id, user_id, token_id, expires_at, last_used_at, last_used_ip, last_used_loc,
                created_at, updated_at, deleted_at
            from sessions where user_id = ? and deleted_at is null order by id",
        )
        .bind(user_id)
        .fetch_all(db)
        .await?;

        Ok(rows.into_iter().map(Self::from_row).collect())
    }

    /// Records use of the live session with the given token id
    ///
    /// Returns `false` if there is no such session, which means it was revoked or never existed.
    pub async fn touch(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        token_id: Uuid,
        user_id: UserId,
        client_ip: &str,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "update sessions set last_used_at = ?, last_used_ip = ?, last_used_loc = ?, updated_at = ?
            where token_id = ? and user_id = ? and deleted_at is null",
        )
        .bind(now)
        .bind(client_ip)
        .bind(user_agent)
        .bind(now)
        .bind(token_id)
        .bind(user_id)
        .execute(db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-deletes all live sessions of the user, returning how many were revoked
    pub async fn revoke_all(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "update sessions set deleted_at = ?, updated_at = ? where user_id = ? and deleted_at is null",
        )
        .bind(now)
        .bind(now)
        .bind(user_id)
        .execute(db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Cleans expired sessions from database.
    pub async fn cleanup(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("delete from sessions where expires_at <= ?")
            .bind(now)
            .execute(db)
            .await?;

        Ok(result.rows_affected())
    }

    fn from_row(
        (
            id,
            user_id,
            token_id,
            expires_at,
            last_used_at,
            last_used_ip,
            last_used_loc,
            created_at,
            updated_at,
            deleted_at,
        ): SessionRow,
    ) -> Self {
        Self {
            meta: RecordMeta::from_row(id, created_at, updated_at, deleted_at),
            user_id,
            token: None,
            token_id,
            expires_at,
            last_used_at,
            last_used_ip,
            last_used_loc,
        }
    }
}

#[Object]
impl Session {
    async fn id(&self) -> SessionId {
        self.meta.id
    }

    async fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    async fn last_used_at(&self) -> DateTime<Utc> {
        self.last_used_at
    }

    async fn last_used_ip(&self) -> &str {
        &self.last_used_ip
    }

    async fn last_used_loc(&self) -> &str {
        &self.last_used_loc
    }
}
