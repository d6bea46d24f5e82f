//! Write-ahead log store.
//!
//! The WAL is the source of truth for all data-changing operations. Records
//! are appended with a freshly allocated LSN, persisted atomically, and then
//! served back through indexed range, time, and per-document queries, always
//! in ascending LSN order. Branch metadata only ever holds LSN coordinates
//! into this log.

mod file;
mod memory;

pub use file::{FileWalStore, FileWalStoreConfig};
pub use memory::MemoryWalStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use timberdb_core::{BranchId, Lsn, NewRecord, ProjectId, TimberResult, WalRecord};

/// Append and retrieval contract for the record log.
///
/// Implementations must guarantee:
/// 1. Commit order equals LSN order: `append(a)` returning before `append(b)`
///    starts implies `a.lsn < b.lsn`.
/// 2. Atomicity: an append is entirely visible to later reads or entirely
///    absent; a torn record is a bug.
/// 3. Range and history queries return records sorted by LSN ascending,
///    inclusive on both bounds.
/// 4. Timestamps never decrease along the log.
#[async_trait]
pub trait WalStore: Send + Sync {
    /// Allocates an LSN, stamps and durably persists the record, and
    /// returns the committed LSN.
    ///
    /// # Errors
    ///
    /// - `Busy` when the in-flight append bound is exhausted.
    /// - `Storage`/`Io` on persistence failure; the allocated LSN is burned
    ///   and never reused.
    async fn append(&self, record: NewRecord) -> TimberResult<Lsn>;

    /// Fetches a single record by LSN.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no record carries this LSN.
    async fn get(&self, lsn: Lsn) -> TimberResult<WalRecord>;

    /// Records belonging to `branch_id` with `lo <= lsn <= hi`, optionally
    /// scoped to one collection, sorted by LSN ascending.
    async fn get_branch_entries(
        &self,
        branch_id: BranchId,
        collection: Option<&str>,
        lo: Lsn,
        hi: Lsn,
    ) -> TimberResult<Vec<WalRecord>>;

    /// All of a project's records with `timestamp <= at_or_before`, sorted
    /// by LSN ascending.
    async fn get_entries_by_time(
        &self,
        project_id: ProjectId,
        at_or_before: DateTime<Utc>,
    ) -> TimberResult<Vec<WalRecord>>;

    /// One document's records on one branch within `[lo, hi]`, sorted by
    /// LSN ascending.
    async fn get_document_history(
        &self,
        branch_id: BranchId,
        collection: &str,
        document_id: &str,
        lo: Lsn,
        hi: Lsn,
    ) -> TimberResult<Vec<WalRecord>>;

    /// The largest committed LSN (`Lsn::ZERO` for an empty log).
    async fn current_lsn(&self) -> TimberResult<Lsn>;
}
