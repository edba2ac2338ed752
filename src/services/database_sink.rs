//! Relational sink for generated artifacts, backed by a bounded SQLite pool.
//!
//! Every operation draws a connection from the injected pool. Writes run in a
//! transaction that is rolled back explicitly before any error is returned.

use crate::models::{
    content::{ContentRecord, ContentSummary},
    generation::Metadata,
};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    types::Json,
};
use std::{str::FromStr, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Schema applied by `--migrate` and by test fixtures.
const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 100;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("content is {size} bytes, exceeding the {limit} byte limit")]
    ContentTooLarge { size: usize, limit: usize },
    #[error("a record named `{0}` already exists")]
    DuplicateFilename(String),
    #[error("no database connection available (pool exhausted)")]
    PoolExhausted,
    #[error("content record {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Sizing for the shared pool.
#[derive(Clone, Copy, Debug)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Open a bounded pool for `database_url`, creating the database file if needed.
pub async fn connect(database_url: &str, settings: PoolSettings) -> DatabaseResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_with(options)
        .await
        .map_err(map_pool_error)?;
    debug!(
        max_connections = settings.max_connections,
        acquire_timeout_secs = settings.acquire_timeout.as_secs(),
        "database pool ready"
    );
    Ok(pool)
}

/// Apply the embedded schema. Statements are idempotent.
pub async fn run_migrations(db: &SqlitePool) -> DatabaseResult<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(())
}

#[derive(Clone)]
pub struct DatabaseSink {
    db: Arc<SqlitePool>,

    /// Ceiling for persisted content, in bytes.
    max_content_bytes: usize,
}

impl DatabaseSink {
    pub fn new(db: Arc<SqlitePool>, max_content_bytes: usize) -> Self {
        Self {
            db,
            max_content_bytes,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert a new record and return it as stored.
    ///
    /// Fails with `ContentTooLarge` before touching the pool when the content
    /// exceeds the ceiling. A duplicate filename is a `DuplicateFilename`.
    pub async fn insert(
        &self,
        filename: &str,
        content: &str,
        metadata: Option<&Metadata>,
    ) -> DatabaseResult<ContentRecord> {
        if content.len() > self.max_content_bytes {
            return Err(DatabaseError::ContentTooLarge {
                size: content.len(),
                limit: self.max_content_bytes,
            });
        }

        let mut tx = self.db.begin().await.map_err(map_pool_error)?;

        let inserted = sqlx::query_as::<_, ContentRecord>(
            r#"
            INSERT INTO html_content (filename, content, metadata)
            VALUES (?, ?, ?)
            RETURNING id, filename, content, metadata, created_at
            "#,
        )
        .bind(filename)
        .bind(content)
        .bind(metadata.map(Json))
        .fetch_one(&mut *tx)
        .await;

        let record = match inserted {
            Ok(record) => record,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("rollback after failed insert also failed: {}", rollback_err);
                }
                return Err(if is_unique_violation(&err) {
                    DatabaseError::DuplicateFilename(filename.to_string())
                } else {
                    DatabaseError::Sqlx(err)
                });
            }
        };

        tx.commit().await?;
        debug!(id = record.id, filename, "content record inserted");
        Ok(record)
    }

    pub async fn get_by_id(&self, id: i64) -> DatabaseResult<ContentRecord> {
        sqlx::query_as::<_, ContentRecord>(
            "SELECT id, filename, content, metadata, created_at
             FROM html_content WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound(id),
            other => map_pool_error(other),
        })
    }

    /// Newest records first. `limit` is clamped to `1..=MAX_LIST_LIMIT`.
    pub async fn list(&self, limit: i64, offset: i64) -> DatabaseResult<Vec<ContentSummary>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let offset = offset.max(0);
        let rows = sqlx::query_as::<_, ContentSummary>(
            "SELECT id, filename, metadata, created_at
             FROM html_content
             ORDER BY created_at DESC, id DESC
             LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&*self.db)
        .await
        .map_err(map_pool_error)?;
        Ok(rows)
    }

    pub async fn delete_by_id(&self, id: i64) -> DatabaseResult<()> {
        let result = sqlx::query("DELETE FROM html_content WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await
            .map_err(map_pool_error)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(id));
        }
        debug!(id, "content record deleted");
        Ok(())
    }
}

fn map_pool_error(err: sqlx::Error) -> DatabaseError {
    match err {
        sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted,
        other => DatabaseError::Sqlx(other),
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_pool;
    use serde_json::json;
    use tempfile::TempDir;

    fn metadata(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn insert_then_get_by_id() {
        let dir = TempDir::new().unwrap();
        let sink = DatabaseSink::new(test_pool(&dir).await, 1024);
        let meta = metadata(json!({ "project": "AI research", "tags": [1, 2] }));

        let record = sink
            .insert("doc.txt", "<html>graph</html>", Some(&meta))
            .await
            .unwrap();
        assert!(record.id > 0);

        let fetched = sink.get_by_id(record.id).await.unwrap();
        assert_eq!(fetched.filename, "doc.txt");
        assert_eq!(fetched.content, "<html>graph</html>");
        assert_eq!(fetched.metadata.map(|m| m.0), Some(meta));
        assert_eq!(fetched.created_at, record.created_at);
    }

    #[tokio::test]
    async fn duplicate_filename_is_rejected_and_rolled_back() {
        let dir = TempDir::new().unwrap();
        let sink = DatabaseSink::new(test_pool(&dir).await, 1024);

        sink.insert("doc.txt", "one", None).await.unwrap();
        let err = sink.insert("doc.txt", "two", None).await.unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateFilename(name) if name == "doc.txt"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM html_content")
            .fetch_one(sink.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn oversized_content_is_rejected() {
        let dir = TempDir::new().unwrap();
        let sink = DatabaseSink::new(test_pool(&dir).await, 4);

        let err = sink.insert("big.txt", "12345", None).await.unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::ContentTooLarge { size: 5, limit: 4 }
        ));
        sink.insert("ok.txt", "1234", None).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let dir = TempDir::new().unwrap();
        let sink = DatabaseSink::new(test_pool(&dir).await, 1024);

        assert!(matches!(
            sink.get_by_id(42).await,
            Err(DatabaseError::NotFound(42))
        ));
        assert!(matches!(
            sink.delete_by_id(42).await,
            Err(DatabaseError::NotFound(42))
        ));
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let dir = TempDir::new().unwrap();
        let sink = DatabaseSink::new(test_pool(&dir).await, 1024);
        let record = sink.insert("doc.txt", "x", None).await.unwrap();

        sink.delete_by_id(record.id).await.unwrap();
        assert!(matches!(
            sink.get_by_id(record.id).await,
            Err(DatabaseError::NotFound(_))
        ));
        // The filename is free again once the record is gone.
        sink.insert("doc.txt", "y", None).await.unwrap();
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paginated() {
        let dir = TempDir::new().unwrap();
        let sink = DatabaseSink::new(test_pool(&dir).await, 1024);
        for name in ["a.txt", "b.txt", "c.txt"] {
            sink.insert(name, "x", None).await.unwrap();
        }

        let page = sink.list(2, 0).await.unwrap();
        let names: Vec<_> = page.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, ["c.txt", "b.txt"]);

        let rest = sink.list(2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].filename, "a.txt");

        assert_eq!(sink.list(0, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("pool.db").display());
        let pool = connect(
            &url,
            PoolSettings {
                max_connections: 1,
                acquire_timeout: Duration::from_millis(200),
            },
        )
        .await
        .unwrap();
        run_migrations(&pool).await.unwrap();
        let sink = DatabaseSink::new(Arc::new(pool), 1024);

        let _held = sink.pool().acquire().await.unwrap();
        let err = sink.insert("doc.txt", "x", None).await.unwrap_err();
        assert!(matches!(err, DatabaseError::PoolExhausted));
    }
}
