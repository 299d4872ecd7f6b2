//! Breakpoint persistence: how far each resumable transfer progressed.
//!
//! A record exists for a url exactly while that url's transfer is resumable
//! and neither finished nor canceled. The engine upserts it after every
//! chunk and deletes it on completion or cancel; pause and error keep it.
//!
//! Two stores implement [`BreakpointStore`]:
//! - [`SqliteBreakpointStore`] - survives process restarts
//! - [`MemoryBreakpointStore`] - process-local, used in tests and one-shot runs

mod error;
mod memory;
mod sqlite;

pub use error::{BreakpointError, StoreErrorKind};
pub use memory::MemoryBreakpointStore;
pub use sqlite::SqliteBreakpointStore;

use async_trait::async_trait;
use serde::Serialize;

/// Block id used by the single-segment transfer model.
pub const SINGLE_BLOCK_ID: i64 = 1;

/// One persisted resume point, keyed by `(url_hash, block_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakpointRecord {
    /// Content identity: hash of the source url.
    pub url_hash: String,
    /// Task tag, for deletion by tag.
    pub tag: String,
    /// Offset the next request resumes from.
    pub start_point: u64,
    /// Expected final offset.
    pub end_point: u64,
    /// Segment id; always [`SINGLE_BLOCK_ID`] for now.
    pub block_id: i64,
    /// Server validator (`ETag` or `Last-Modified`), empty when none was sent.
    pub etag: String,
}

/// Repository contract for breakpoint records.
///
/// Implementations must tolerate concurrent calls from every running
/// transfer.
#[async_trait]
pub trait BreakpointStore: Send + Sync + std::fmt::Debug {
    /// Returns the record for a url identity, if any.
    async fn find(&self, url_hash: &str) -> Result<Option<BreakpointRecord>, BreakpointError>;

    /// Inserts or replaces the record for `(url_hash, block_id)`.
    async fn upsert(&self, record: &BreakpointRecord) -> Result<(), BreakpointError>;

    /// Deletes every record for a url identity, returning how many went.
    async fn delete_by_url(&self, url_hash: &str) -> Result<u64, BreakpointError>;

    /// Deletes every record carrying `tag`, returning how many went.
    async fn delete_by_tag(&self, tag: &str) -> Result<u64, BreakpointError>;

    /// Releases underlying resources. Later calls may fail.
    async fn close(&self) {}
}
