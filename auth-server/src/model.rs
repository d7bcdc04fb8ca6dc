//! Service global context

use std::path::PathBuf;
use std::sync::Arc;

use async_graphql::{EmptyMutation, EmptySubscription};
use chrono::Utc;
use color_eyre::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use thiserror::Error;

pub mod auth;
pub mod password;
pub mod record;
pub mod sessions;
pub mod token;
pub mod users;

use crate::config;
use crate::model::auth::SessionManager;
use crate::model::sessions::Session;
use crate::query::Query;
use crate::service::Schema;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Invalid SQLite path: {path}")]
    InvalidSQLitePath { path: PathBuf },
}

/// Context shared by all the request handlers
#[derive(Clone)]
pub struct Model {
    /// Database access
    db: sqlx::SqlitePool,
    /// Sessions manager, owning the signing secret
    sessions: Arc<SessionManager>,
}

impl Model {
    /// Context for testing purposes - using a private in-memory SQLite database
    #[cfg(test)]
    pub async fn test() -> Result<Self> {
        Self::test_with(SessionManager::test()).await
    }

    /// Testing context with the given sessions manager
    #[cfg(test)]
    pub async fn test_with(sessions: SessionManager) -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        // Single connection kept forever - the database lives as long as it does
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_lazy_with(opts);

        sqlx::migrate!("model/migrations").run(&db).await?;

        Ok(Self {
            db,
            sessions: Arc::new(sessions),
        })
    }

    /// Context from configuration
    ///
    /// If the database is created in-memory, the migrations are being executed automatically. If database is
    /// file based migrations would be executed only if requested by configuration.
    pub async fn with_config(config: config::Database, sessions: SessionManager) -> Result<Self> {
        use config::Database::*;

        let db = match config {
            Memory { max_connections } => {
                // In-memory database shared by all the pooled connections
                let opts = "sqlite::memory:"
                    .parse::<SqliteConnectOptions>()?
                    .foreign_keys(true);

                let pool = SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_lazy_with(opts);

                sqlx::migrate!("model/migrations").run(&pool).await?;
                pool
            }

            SqLite {
                path,
                max_connections,
                migrate,
            } => {
                let path = path
                    .as_path()
                    .to_str()
                    .ok_or_else(|| Error::InvalidSQLitePath { path: path.clone() })?;

                let opts = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .foreign_keys(true);

                let pool = SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .connect_lazy_with(opts);

                if migrate {
                    sqlx::migrate!("model/migrations").run(&pool).await?;
                }

                pool
            }
        };

        Ok(Self {
            db,
            sessions: Arc::new(sessions),
        })
    }

    /// Buids schema with attached context
    pub fn schema(&self) -> Schema {
        Schema::build(Query::new(), EmptyMutation, EmptySubscription)
            .data(self.clone())
            .finish()
    }

    /// Accesses the DB pool
    pub fn db(&self) -> &sqlx::SqlitePool {
        &self.db
    }

    /// Accesses the sessions manager
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Performs cleanup on the model, returns number of removed expired sessions
    pub async fn cleanup(&self) -> Result<u64> {
        Session::cleanup(&self.db, Utc::now())
            .await
            .map_err(Into::into)
    }
}
