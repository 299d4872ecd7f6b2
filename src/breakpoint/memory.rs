//! Process-local breakpoint store.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{BreakpointError, BreakpointRecord, BreakpointStore};

/// In-memory [`BreakpointStore`] backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct MemoryBreakpointStore {
    records: DashMap<(String, i64), BreakpointRecord>,
}

impl MemoryBreakpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl BreakpointStore for MemoryBreakpointStore {
    async fn find(&self, url_hash: &str) -> Result<Option<BreakpointRecord>, BreakpointError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().0 == url_hash)
            .min_by_key(|entry| entry.key().1)
            .map(|entry| entry.value().clone()))
    }

    async fn upsert(&self, record: &BreakpointRecord) -> Result<(), BreakpointError> {
        self.records.insert(
            (record.url_hash.clone(), record.block_id),
            record.clone(),
        );
        Ok(())
    }

    async fn delete_by_url(&self, url_hash: &str) -> Result<u64, BreakpointError> {
        let before = self.records.len();
        self.records.retain(|key, _| key.0 != url_hash);
        Ok(before.saturating_sub(self.records.len()) as u64)
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<u64, BreakpointError> {
        let before = self.records.len();
        self.records.retain(|_, record| record.tag != tag);
        Ok(before.saturating_sub(self.records.len()) as u64)
    }
}
