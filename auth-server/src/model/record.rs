//! Bookkeeping fields shared by stored records

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identity and lifecycle timestamps of a stored record
///
/// Embedded by every persisted entity. `deleted_at` is the soft-delete marker - records carrying
/// it are treated as non-existent by every query, and it is never exposed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordMeta<Id> {
    /// Record identifier
    pub id: Id,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
    /// Soft-deletion time
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl<Id> RecordMeta<Id> {
    /// Metadata of a record created at `now`
    pub fn created(id: Id, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Builds metadata from the stored columns
    pub fn from_row(
        id: Id,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            created_at,
            updated_at,
            deleted_at,
        }
    }
}
