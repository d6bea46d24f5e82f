//! Time travel and restore.
//!
//! Historical reads delegate to the materializer; restores move a branch
//! head backward (the single legal backward movement) or fork a new branch
//! at a historical position. Every destructive path validates before it
//! mutates, and the preview is a pure function safe to call repeatedly.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::info;

use timberdb_core::{
    BranchDescriptor, BranchId, Lsn, OpClass, TimberError, TimberResult, WalRecord,
};

use crate::cache::CollectionState;
use crate::engine::Engine;

/// Summary of a branch's reachable history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeTravelInfo {
    /// First record in the branch's view, if any.
    pub earliest_lsn: Option<Lsn>,
    /// Last record in the branch's view, if any.
    pub latest_lsn: Option<Lsn>,
    /// Timestamp of the first record.
    pub earliest_time: Option<DateTime<Utc>>,
    /// Timestamp of the last record.
    pub latest_time: Option<DateTime<Utc>>,
    /// Number of records in the view.
    pub entry_count: usize,
}

/// Dry-run description of a reset. Performing no writes, it may be called
/// repeatedly; two calls return equal results absent concurrent writes.
#[derive(Debug, Clone)]
pub struct RestorePreview {
    /// Branch being previewed.
    pub branch_id: BranchId,
    /// The branch head today.
    pub current_lsn: Lsn,
    /// The proposed reset target.
    pub target_lsn: Lsn,
    /// Records on this branch in `(target, head]` that the reset strands.
    pub ops_to_discard: u64,
    /// The stranded count partitioned by collection.
    pub affected_collections: BTreeMap<String, u64>,
    /// Collections non-empty at the current head.
    pub current_collections: Vec<String>,
    /// Collections non-empty at the target.
    pub target_collections: Vec<String>,
}

impl Engine {
    /// Materializes one collection at an exact LSN.
    ///
    /// # Errors
    ///
    /// `OutOfRange` when `lsn` lies outside the branch's range.
    pub async fn materialize_at_lsn(
        &self,
        project: &str,
        branch: &str,
        collection: &str,
        lsn: Lsn,
    ) -> TimberResult<CollectionState> {
        self.ensure_ready()?;
        self.timed(OpClass::Materialize, async {
            let (_, branch) = self.resolve_branch(project, branch).await?;
            let state = self
                .materializer
                .materialize_at_lsn(&branch, collection, lsn)
                .await?;
            Ok((*state).clone())
        })
        .await
    }

    /// Materializes one collection as of a wall-clock instant.
    ///
    /// # Errors
    ///
    /// `OutOfRange` when no record in the branch's view is at or before the
    /// requested time.
    pub async fn materialize_at_time(
        &self,
        project: &str,
        branch: &str,
        collection: &str,
        at: DateTime<Utc>,
    ) -> TimberResult<CollectionState> {
        self.ensure_ready()?;
        self.timed(OpClass::Materialize, async {
            let (_, branch) = self.resolve_branch(project, branch).await?;
            let (_, state) = self
                .materializer
                .materialize_at_time(&branch, collection, at)
                .await?;
            Ok((*state).clone())
        })
        .await
    }

    /// Materializes every collection modified in the branch's view up to
    /// `lsn`.
    ///
    /// # Errors
    ///
    /// `OutOfRange` when `lsn` lies outside the branch's range.
    pub async fn get_branch_state_at_lsn(
        &self,
        project: &str,
        branch: &str,
        lsn: Lsn,
    ) -> TimberResult<BTreeMap<String, CollectionState>> {
        self.ensure_ready()?;
        self.timed(OpClass::Materialize, async {
            let (_, branch) = self.resolve_branch(project, branch).await?;
            if !branch.contains_lsn(lsn) {
                return Err(TimberError::out_of_range(format!(
                    "LSN {} outside branch range [{}, {}]",
                    lsn, branch.base_lsn, branch.head_lsn
                )));
            }
            let mut result = BTreeMap::new();
            for collection in self.materializer.collections_in_chain(&branch, lsn).await? {
                let state = self
                    .materializer
                    .materialize_at_lsn(&branch, &collection, lsn)
                    .await?;
                result.insert(collection, (*state).clone());
            }
            Ok(result)
        })
        .await
    }

    /// One document's records along the branch's view, up to `lsn`.
    ///
    /// # Errors
    ///
    /// `OutOfRange` when `lsn` lies outside the branch's range.
    pub async fn get_document_history_at_lsn(
        &self,
        project: &str,
        branch: &str,
        collection: &str,
        document_id: &str,
        lsn: Lsn,
    ) -> TimberResult<Vec<WalRecord>> {
        self.ensure_ready()?;
        let (_, branch) = self.resolve_branch(project, branch).await?;
        if !branch.contains_lsn(lsn) {
            return Err(TimberError::out_of_range(format!(
                "LSN {} outside branch range [{}, {}]",
                lsn, branch.base_lsn, branch.head_lsn
            )));
        }

        let mut records = Vec::new();
        for segment in self.materializer.chain_segments(&branch, lsn).await? {
            if segment.up_to <= segment.after {
                continue;
            }
            let entries = self
                .wal()
                .get_document_history(
                    segment.branch_id,
                    collection,
                    document_id,
                    segment.after.next(),
                    segment.up_to,
                )
                .await?;
            records.extend(entries);
        }
        Ok(records)
    }

    /// Collections touched by this branch's own records in `[lo, hi]`.
    pub async fn find_modified_collections(
        &self,
        project: &str,
        branch: &str,
        lo: Lsn,
        hi: Lsn,
    ) -> TimberResult<BTreeSet<String>> {
        self.ensure_ready()?;
        let (_, branch) = self.resolve_branch(project, branch).await?;
        let entries = self
            .wal()
            .get_branch_entries(branch.id, None, lo, hi)
            .await?;
        Ok(entries
            .into_iter()
            .filter(|r| !r.collection.is_empty())
            .map(|r| r.collection)
            .collect())
    }

    /// LSN/time bounds and record count of the branch's reachable history.
    pub async fn get_time_travel_info(
        &self,
        project: &str,
        branch: &str,
    ) -> TimberResult<TimeTravelInfo> {
        self.ensure_ready()?;
        let (_, branch) = self.resolve_branch(project, branch).await?;
        let records = self
            .materializer
            .chain_records(&branch, None, branch.head_lsn)
            .await?;

        Ok(TimeTravelInfo {
            earliest_lsn: records.first().map(|r| r.lsn),
            latest_lsn: records.last().map(|r| r.lsn),
            earliest_time: records.first().map(|r| r.timestamp),
            latest_time: records.last().map(|r| r.timestamp),
            entry_count: records.len(),
        })
    }

    /// Checks that a reset of `branch` to `target_lsn` would be legal,
    /// without mutating anything.
    ///
    /// # Errors
    ///
    /// - `OutOfRange` when the target is before the branch base or beyond
    ///   the head.
    /// - `Conflict` when the branch is not ACTIVE.
    pub async fn validate_restore(
        &self,
        project: &str,
        branch: &str,
        target_lsn: Lsn,
    ) -> TimberResult<()> {
        self.ensure_ready()?;
        let (_, branch) = self.resolve_branch(project, branch).await?;
        validate_reset_target(&branch, target_lsn)
    }

    /// Describes what a reset to `target_lsn` would discard.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::validate_restore`].
    pub async fn get_restore_preview(
        &self,
        project: &str,
        branch: &str,
        target_lsn: Lsn,
    ) -> TimberResult<RestorePreview> {
        self.ensure_ready()?;
        let (_, branch) = self.resolve_branch(project, branch).await?;
        validate_reset_target(&branch, target_lsn)?;

        let discarded = self
            .wal()
            .get_branch_entries(branch.id, None, target_lsn.next(), branch.head_lsn)
            .await?;
        let mut affected_collections: BTreeMap<String, u64> = BTreeMap::new();
        for record in &discarded {
            *affected_collections
                .entry(record.collection.clone())
                .or_default() += 1;
        }

        let current_collections = self.non_empty_collections(&branch, branch.head_lsn).await?;
        let target_collections = self.non_empty_collections(&branch, target_lsn).await?;

        Ok(RestorePreview {
            branch_id: branch.id,
            current_lsn: branch.head_lsn,
            target_lsn,
            ops_to_discard: discarded.len() as u64,
            affected_collections,
            current_collections,
            target_collections,
        })
    }

    /// Moves the branch head back to `target_lsn`. Records above the target
    /// stay in the log but become unreachable from this branch's future
    /// reads (and eligible for GC once nothing references them).
    ///
    /// # Errors
    ///
    /// Same as [`Engine::validate_restore`]; all validation happens before
    /// the head is rewritten.
    pub async fn reset_branch_to_lsn(
        &self,
        project: &str,
        branch: &str,
        target_lsn: Lsn,
    ) -> TimberResult<BranchDescriptor> {
        self.ensure_ready()?;
        let result = self
            .timed(
                OpClass::Restore,
                self.reset_branch_inner(project, branch, target_lsn),
            )
            .await;
        self.refresh_gauges().await;
        result
    }

    async fn reset_branch_inner(
        &self,
        project: &str,
        branch_name: &str,
        target_lsn: Lsn,
    ) -> TimberResult<BranchDescriptor> {
        let (_, branch) = self.resolve_branch(project, branch_name).await?;
        validate_reset_target(&branch, target_lsn)?;

        let updated = self.catalog().reset_head(branch.id, target_lsn).await?;
        self.materializer.invalidate_branch(branch.id).await;
        info!(
            project,
            branch = branch_name,
            from = %branch.head_lsn,
            to = %target_lsn,
            "reset branch head"
        );
        Ok(updated)
    }

    /// Resets the branch head to its position as of `at`.
    ///
    /// # Errors
    ///
    /// `OutOfRange` when no record is old enough or the resolved position
    /// falls outside the branch's own range.
    pub async fn reset_branch_to_time(
        &self,
        project: &str,
        branch: &str,
        at: DateTime<Utc>,
    ) -> TimberResult<BranchDescriptor> {
        self.ensure_ready()?;
        let result = self
            .timed(OpClass::Restore, async {
                let (_, descriptor) = self.resolve_branch(project, branch).await?;
                let target = self.materializer.resolve_time(&descriptor, at).await?;
                self.reset_branch_inner(project, branch, target).await
            })
            .await;
        self.refresh_gauges().await;
        result
    }

    /// Forks a new branch off `source` at `fork_lsn`. The new branch
    /// inherits the source's view up to the fork and then diverges; writes
    /// on either side never affect the other.
    ///
    /// # Errors
    ///
    /// `Conflict` on a duplicate name; `OutOfRange` on a fork point outside
    /// the source's range.
    pub async fn create_branch_at_lsn(
        &self,
        project: &str,
        source: &str,
        new_name: &str,
        fork_lsn: Lsn,
    ) -> TimberResult<BranchDescriptor> {
        self.create_branch(project, new_name, source, Some(fork_lsn))
            .await
    }

    /// Forks a new branch off `source` at its position as of `at`.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::create_branch_at_lsn`], plus `OutOfRange` when no
    /// record is old enough.
    pub async fn create_branch_at_time(
        &self,
        project: &str,
        source: &str,
        new_name: &str,
        at: DateTime<Utc>,
    ) -> TimberResult<BranchDescriptor> {
        self.ensure_ready()?;
        let (_, source_branch) = self.resolve_branch(project, source).await?;
        let fork_lsn = self.materializer.resolve_time(&source_branch, at).await?;
        self.create_branch(project, new_name, source, Some(fork_lsn))
            .await
    }

    async fn non_empty_collections(
        &self,
        branch: &BranchDescriptor,
        lsn: Lsn,
    ) -> TimberResult<Vec<String>> {
        let mut non_empty = Vec::new();
        for collection in self.materializer.collections_in_chain(branch, lsn).await? {
            let state = self
                .materializer
                .materialize_at_lsn(branch, &collection, lsn)
                .await?;
            if !state.is_empty() {
                non_empty.push(collection);
            }
        }
        Ok(non_empty)
    }
}

fn validate_reset_target(branch: &BranchDescriptor, target: Lsn) -> TimberResult<()> {
    if !branch.is_active() {
        return Err(TimberError::conflict(format!(
            "branch `{}` is not active",
            branch.name
        )));
    }
    if target < branch.base_lsn {
        return Err(TimberError::out_of_range(format!(
            "target {} is before branch base LSN {}",
            target, branch.base_lsn
        )));
    }
    if target > branch.head_lsn {
        return Err(TimberError::out_of_range(format!(
            "target {} is beyond branch head {}",
            target, branch.head_lsn
        )));
    }
    Ok(())
}
