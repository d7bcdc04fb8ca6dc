//! Service users storage

use async_graphql::{Object, scalar};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::Type;
use thiserror::Error;

use crate::model::password;
use crate::model::record::RecordMeta;

/// Minimal accepted password length, in characters
pub const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("Password must be at least {MIN_PASSWORD_LENGTH} characters long")]
    PasswordTooShort,
    #[error("Email already registered")]
    EmailTaken,
    #[error(transparent)]
    Password(#[from] password::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Newtype for user id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(i64);

scalar!(UserId);

impl UserId {
    /// Sentinel for "no identity", never assigned to a stored user
    pub const ANONYMOUS: UserId = UserId(0);

    pub fn is_anonymous(self) -> bool {
        self == Self::ANONYMOUS
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered user
///
/// The password hash is never serialized, so the user can be returned to clients as is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    #[serde(flatten)]
    pub meta: RecordMeta<UserId>,
    /// Login email, unique among users
    pub email: String,
    /// Argon2id hash of the password in PHC format
    #[serde(skip)]
    pub password_hash: String,
}

/// Row layout of the `users` table
type UserRow = (
    UserId,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

impl User {
    /// Fetches user from the database
    pub async fn fetch(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        user_id: UserId,
    ) -> Result<Option<Self>, Error> {
        let row: Option<UserRow> = sqlx::query_as(
            "select id, email, password_hash, created_at, updated_at, deleted_at
            from users where id = ? and deleted_at is null",
        )
        .bind(user_id)
        .fetch_optional(db)
        .await?;

        Ok(row.map(Self::from_row))
    }

    /// Fetches user by their login email
    pub async fn fetch_by_email(
        db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
        email: &str,
    ) -> Result<Option<Self>, Error> {
        let row: Option<UserRow> = sqlx::query_as(
            "select id, email, password_hash, created_at, updated_at, deleted_at
            from users where email = ? and deleted_at is null",
        )
        .bind(email)
        .fetch_optional(db)
        .await?;

        Ok(row.map(Self::from_row))
    }

    /// Checks the password against the stored hash
    pub fn verify_password(&self, password: &str) -> Result<bool, Error> {
        password::verify(password, &self.password_hash).map_err(Into::into)
    }

    fn from_row(
        (id, email, password_hash, created_at, updated_at, deleted_at): UserRow,
    ) -> Self {
        Self {
            meta: RecordMeta::from_row(id, created_at, updated_at, deleted_at),
            email,
            password_hash,
        }
    }
}

#[Object]
impl User {
    async fn id(&self) -> UserId {
        self.meta.id
    }

    async fn email(&self) -> &str {
        &self.email
    }

    async fn created_at(&self) -> DateTime<Utc> {
        self.meta.created_at
    }

    async fn updated_at(&self) -> DateTime<Utc> {
        self.meta.updated_at
    }
}

/// Registration data of a user to be created
pub struct NewUser {
    pub email: String,
    pub password: String,
}

impl NewUser {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Validates the registration data
    pub fn validate(&self) -> Result<(), Error> {
        validate_credentials(&self.email, &self.password)
    }

    /// Validates and creates the user in the database
    ///
    /// Emails are compared as given. Soft-deleted users still hold their email.
    pub async fn create(
        self,
        db: impl sqlx::Acquire<'_, Database = sqlx::Sqlite>,
    ) -> Result<User, Error> {
        self.validate()?;

        let mut tx = db.begin().await?;

        let existing: Option<(UserId,)> = sqlx::query_as("select id from users where email = ?")
            .bind(&self.email)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(Error::EmailTaken);
        }

        let password_hash = password::hash(&self.password)?;
        let now = Utc::now();

        let result = sqlx::query(
            "insert into users (email, password_hash, created_at, updated_at) values (?, ?, ?, ?)",
        )
        .bind(&self.email)
        .bind(&password_hash)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Error::EmailTaken,
            err => err.into(),
        })?;

        tx.commit().await?;

        Ok(User {
            meta: RecordMeta::created(UserId(result.last_insert_rowid()), now),
            email: self.email,
            password_hash,
        })
    }
}

/// Checks the shape of an email and password pair, without looking at the stored users
pub fn validate_credentials(email: &str, password: &str) -> Result<(), Error> {
    if !is_valid_email(email) {
        return Err(Error::InvalidEmail);
    }

    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(Error::PasswordTooShort);
    }

    Ok(())
}

/// Syntactic email check
///
/// Accepts `local@domain` where the domain has at least two dot separated labels made of
/// alphanumerics and hyphens. Deliverability is not the concern here.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }

    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };

    if local.is_empty() || local.len() > 64 || local.contains('@') {
        return false;
    }

    if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
