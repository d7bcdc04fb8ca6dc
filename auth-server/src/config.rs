//! Service configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Deserializer};
use tracing_subscriber::filter::Directive;

/// Logging output format
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum LogFormat {
    Compact,
    Pretty,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Compact
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    /// Additional filtering directives
    #[serde(deserialize_with = "Logging::deserialize_filters")]
    pub filters: Vec<Directive>,

    /// Logging format
    pub format: LogFormat,
}

impl Logging {
    fn deserialize_filters<'de, D>(deserializer: D) -> Result<Vec<Directive>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let dirs: Vec<String> = Deserialize::deserialize(deserializer)?;
        dirs.into_iter()
            .map(|dir| dir.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Database {
    /// In-memory database, lost on shutdown
    Memory {
        #[serde(default = "Database::default_max_connections")]
        max_connections: u32,
    },
    /// File based SQLite database
    SqLite {
        /// Database file, created if missing
        path: PathBuf,
        #[serde(default = "Database::default_max_connections")]
        max_connections: u32,
        /// Runs migrations on startup
        #[serde(default)]
        migrate: bool,
    },
}

impl Database {
    fn default_max_connections() -> u32 {
        1
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::Memory {
            max_connections: Self::default_max_connections(),
        }
    }
}

/// Sessions configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Auth {
    /// Environment variable holding the token signing secret
    pub secret_env: String,

    /// Session lifetime in seconds
    pub session_ttl: u64,

    /// Requires a live session record for every authenticated request, so logout revokes tokens
    pub verify_session_store: bool,

    /// Period of expired sessions cleanup in seconds, no cleanup if not set
    pub cleanup_interval: Option<u64>,
}

impl Auth {
    /// Session lifetime, `None` if out of range
    pub fn ttl(&self) -> Option<TimeDelta> {
        i64::try_from(self.session_ttl)
            .ok()
            .and_then(TimeDelta::try_seconds)
    }

    /// Period of expired sessions cleanup
    pub fn cleanup_period(&self) -> Option<Duration> {
        self.cleanup_interval
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            secret_env: "JWT_SECRET_KEY".to_owned(),
            session_ttl: 24 * 60 * 60,
            verify_session_store: true,
            cleanup_interval: None,
        }
    }
}

/// Top level service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address where to host the service
    #[serde(default = "Config::default_host")]
    pub host: SocketAddr,

    /// Enables GraphiQL endpoint
    #[serde(default)]
    pub graphiql: bool,

    /// Logging configuration
    #[serde(default)]
    pub logging: Logging,

    /// Database configuration
    #[serde(default)]
    pub db: Database,

    /// Sessions configuration
    #[serde(default)]
    pub auth: Auth,
}

impl Config {
    fn default_host() -> SocketAddr {
        ([127, 0, 0, 1], 3030).into()
    }
}
