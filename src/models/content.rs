//! Represents a generated HTML document persisted in the relational store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};

use super::generation::Metadata;

/// A persisted content record.
///
/// Records are immutable once created: they can be read, listed and deleted,
/// never updated. `id` and `created_at` are assigned by the store at insert time.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ContentRecord {
    /// Store-assigned identifier (always positive).
    pub id: i64,

    /// Artifact filename, unique across all records.
    pub filename: String,

    /// Full textual content of the generated artifact.
    pub content: String,

    /// Optional caller-supplied metadata, stored as JSON.
    pub metadata: Option<Json<Metadata>>,

    /// When the record was inserted.
    pub created_at: DateTime<Utc>,
}

/// A content record without its body, as returned by listings.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ContentSummary {
    pub id: i64,
    pub filename: String,
    pub metadata: Option<Json<Metadata>>,
    pub created_at: DateTime<Utc>,
}
