//! `SQLite`-backed breakpoint store.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

use super::{BreakpointError, BreakpointRecord, BreakpointStore};
use crate::db::Database;

/// [`BreakpointStore`] persisting records in the `breakpoints` table.
///
/// The pool serializes writers through `SQLite`'s own locking with a busy
/// timeout, so concurrent transfers can share one store.
#[derive(Debug, Clone)]
pub struct SqliteBreakpointStore {
    db: Database,
}

impl SqliteBreakpointStore {
    /// Wraps an opened database; migrations have already created the table.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn offset_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn offset_from_row(row: &SqliteRow, field: &'static str) -> Result<u64, BreakpointError> {
    let value: i64 = row.try_get(field)?;
    u64::try_from(value).map_err(|_| BreakpointError::OutOfRange { field, value })
}

fn record_from_row(row: &SqliteRow) -> Result<BreakpointRecord, BreakpointError> {
    Ok(BreakpointRecord {
        url_hash: row.try_get("url_hash")?,
        tag: row.try_get("tag")?,
        start_point: offset_from_row(row, "start_point")?,
        end_point: offset_from_row(row, "end_point")?,
        block_id: row.try_get("block_id")?,
        etag: row
            .try_get::<Option<String>, _>("etag")?
            .unwrap_or_default(),
    })
}

#[async_trait]
impl BreakpointStore for SqliteBreakpointStore {
    #[instrument(level = "trace", skip(self))]
    async fn find(&self, url_hash: &str) -> Result<Option<BreakpointRecord>, BreakpointError> {
        let row = sqlx::query(
            "SELECT url_hash, tag, start_point, end_point, block_id, etag \
             FROM breakpoints WHERE url_hash = ? ORDER BY block_id LIMIT 1",
        )
        .bind(url_hash)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn upsert(&self, record: &BreakpointRecord) -> Result<(), BreakpointError> {
        sqlx::query(
            "INSERT INTO breakpoints (url_hash, tag, start_point, end_point, block_id, etag) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(url_hash, block_id) DO UPDATE SET \
                tag = excluded.tag, \
                start_point = excluded.start_point, \
                end_point = excluded.end_point, \
                etag = excluded.etag",
        )
        .bind(&record.url_hash)
        .bind(&record.tag)
        .bind(offset_to_i64(record.start_point))
        .bind(offset_to_i64(record.end_point))
        .bind(record.block_id)
        .bind(&record.etag)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete_by_url(&self, url_hash: &str) -> Result<u64, BreakpointError> {
        let result = sqlx::query("DELETE FROM breakpoints WHERE url_hash = ?")
            .bind(url_hash)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete_by_tag(&self, tag: &str) -> Result<u64, BreakpointError> {
        let result = sqlx::query("DELETE FROM breakpoints WHERE tag = ?")
            .bind(tag)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.db.pool().close().await;
    }
}
