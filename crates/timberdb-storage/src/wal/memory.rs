//! In-memory WAL store.
//!
//! Same contract as the file store without persistence or compression; used
//! by upper-layer unit tests and ephemeral engines. Appends hold the record
//! vector's write lock, so visibility order matches LSN order by
//! construction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use timberdb_core::{
    BranchId, Lsn, NewRecord, ProjectId, TimberError, TimberResult, WalRecord,
};

use super::WalStore;
use crate::allocator::LsnAllocator;

/// Volatile WAL store backed by a record vector.
pub struct MemoryWalStore {
    records: RwLock<Vec<WalRecord>>,
    allocator: LsnAllocator,
}

impl MemoryWalStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            allocator: LsnAllocator::new(Lsn::ZERO),
        }
    }

    /// Number of committed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// `true` when no record has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for MemoryWalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalStore for MemoryWalStore {
    async fn append(&self, record: NewRecord) -> TimberResult<Lsn> {
        let mut records = self.records.write();
        let lsn = self.allocator.allocate();
        let timestamp = records
            .last()
            .map_or_else(Utc::now, |prev| Utc::now().max(prev.timestamp));
        records.push(WalRecord::commit(record, lsn, timestamp));
        Ok(lsn)
    }

    async fn get(&self, lsn: Lsn) -> TimberResult<WalRecord> {
        let records = self.records.read();
        records
            .binary_search_by_key(&lsn, |r| r.lsn)
            .ok()
            .map(|i| records[i].clone())
            .ok_or_else(|| TimberError::not_found("wal record", lsn.to_string()))
    }

    async fn get_branch_entries(
        &self,
        branch_id: BranchId,
        collection: Option<&str>,
        lo: Lsn,
        hi: Lsn,
    ) -> TimberResult<Vec<WalRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| {
                r.branch_id == branch_id
                    && lo <= r.lsn
                    && r.lsn <= hi
                    && collection.map_or(true, |c| r.collection == c)
            })
            .cloned()
            .collect())
    }

    async fn get_entries_by_time(
        &self,
        project_id: ProjectId,
        at_or_before: DateTime<Utc>,
    ) -> TimberResult<Vec<WalRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.project_id == project_id && r.timestamp <= at_or_before)
            .cloned()
            .collect())
    }

    async fn get_document_history(
        &self,
        branch_id: BranchId,
        collection: &str,
        document_id: &str,
        lo: Lsn,
        hi: Lsn,
    ) -> TimberResult<Vec<WalRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| {
                r.branch_id == branch_id
                    && r.collection == collection
                    && r.document_id == document_id
                    && lo <= r.lsn
                    && r.lsn <= hi
            })
            .cloned()
            .collect())
    }

    async fn current_lsn(&self) -> TimberResult<Lsn> {
        Ok(self
            .records
            .read()
            .last()
            .map_or(Lsn::ZERO, |r| r.lsn))
    }
}
