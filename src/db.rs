//! The SQLite file that holds breakpoints between runs.
//!
//! Opening a [`Database`] applies the embedded `breakpoints` migration, so a
//! fresh path is ready for [`SqliteBreakpointStore`](crate::SqliteBreakpointStore)
//! straight away.
//!
//! ```no_run
//! use resumable_core::{Database, SqliteBreakpointStore};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("downloads/.breakpoints.db")).await?;
//! let store = SqliteBreakpointStore::new(db);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// Progress writes from concurrent transfers share this many connections.
const MAX_CONNECTIONS: u32 = 5;

/// How long a writer waits on a locked file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures opening the breakpoint database.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to open breakpoint database: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("failed to apply breakpoint schema: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pooled handle to the breakpoint database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the breakpoint file at `db_path`, creating it if missing.
    ///
    /// Every pooled connection runs in WAL mode with a busy timeout, so a
    /// breakpoint lookup for a resuming task does not fail while another
    /// transfer is saving progress.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the file cannot be opened and
    /// [`DbError::Migration`] if the schema cannot be applied.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        Self::migrated(pool).await
    }

    /// In-memory breakpoints, gone when the handle drops.
    ///
    /// Limited to one connection: each `:memory:` connection would
    /// otherwise see its own empty database.
    ///
    /// # Errors
    ///
    /// Same as [`Database::new`].
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!("breakpoint schema ready");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether the file is in WAL mode.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if the pragma query fails.
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.eq_ignore_ascii_case("wal"))
    }

    /// Flushes and closes the pool; pending breakpoint writes finish first.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_breakpoints_table_exists() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO breakpoints (url_hash, tag, start_point, end_point, block_id, etag) \
             VALUES ('h', 't', 0, 10, 1, NULL)",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_ok(), "breakpoints table should exist after migration");
    }

    #[tokio::test]
    async fn test_database_primary_key_rejects_duplicate_block() {
        let db = Database::new_in_memory().await.unwrap();
        let insert = "INSERT INTO breakpoints (url_hash, tag, start_point, end_point, block_id) \
                      VALUES ('h', 't', 0, 10, 1)";
        sqlx::query(insert).execute(db.pool()).await.unwrap();

        let result = sqlx::query(insert).execute(db.pool()).await;
        assert!(result.is_err(), "duplicate (url_hash, block_id) must be rejected");
    }

    #[tokio::test]
    async fn test_database_negative_offset_rejected() {
        let db = Database::new_in_memory().await.unwrap();
        let result = sqlx::query(
            "INSERT INTO breakpoints (url_hash, tag, start_point, end_point, block_id) \
             VALUES ('h', 't', -1, 10, 1)",
        )
        .execute(db.pool())
        .await;
        assert!(result.is_err(), "CHECK constraint should reject negative start_point");
    }

    #[tokio::test]
    async fn test_breakpoint_file_is_created_in_wal_mode() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join(".breakpoints.db");

        let db = Database::new(&db_path).await.unwrap();
        assert!(db_path.exists());
        assert!(db.is_wal_enabled().await.unwrap(), "WAL mode should be enabled");
        db.close().await;

        // Reopening an existing file skips the applied migration.
        Database::new(&db_path).await.unwrap().close().await;
    }
}
