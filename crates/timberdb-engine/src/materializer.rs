//! State reconstruction.
//!
//! The materializer answers "what does collection C look like on branch B as
//! of LSN L (or time T)?" by replaying the branch's relevant WAL segment
//! into an empty map. A branch's view is its own records in
//! `(base_lsn, L]` plus the segments inherited along the parent chain, each
//! capped at the next descendant's fork point. Materialization is a pure
//! function of the log and branch metadata; the cache is an invisible
//! shortcut.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use timberdb_core::{
    BranchDescriptor, BranchId, Lsn, Operation, RecordPayload, TimberError, TimberResult,
    WalRecord,
};
use timberdb_storage::{Catalog, WalStore};

use crate::cache::{CollectionState, StateCache};
use crate::filter::Filter;
use crate::update::UpdateSpec;

/// Upper bound on parent-chain length; exceeding it means the catalog holds
/// a cycle, which is an invariant violation.
const MAX_CHAIN_DEPTH: usize = 256;

/// One contiguous slice of the log contributing to a branch's view.
#[derive(Debug, Clone)]
pub struct ChainSegment {
    /// Branch whose records populate this slice.
    pub branch_id: BranchId,
    /// Exclusive lower bound.
    pub after: Lsn,
    /// Inclusive upper bound.
    pub up_to: Lsn,
}

/// Replays WAL segments into collection states.
pub struct Materializer {
    wal: Arc<dyn WalStore>,
    catalog: Arc<dyn Catalog>,
    cache: StateCache,
}

impl Materializer {
    /// Creates a materializer over the given stores.
    pub fn new(wal: Arc<dyn WalStore>, catalog: Arc<dyn Catalog>, cache: StateCache) -> Self {
        Self {
            wal,
            catalog,
            cache,
        }
    }

    /// The branch's lineage from root to itself, as log segments. The final
    /// (own) segment is capped at `up_to`.
    pub async fn chain_segments(
        &self,
        branch: &BranchDescriptor,
        up_to: Lsn,
    ) -> TimberResult<Vec<ChainSegment>> {
        let mut lineage = vec![branch.clone()];
        let mut current = branch.clone();
        while let Some(parent_id) = current.parent_id {
            if lineage.len() > MAX_CHAIN_DEPTH {
                return Err(TimberError::internal(format!(
                    "branch ancestry of `{}` exceeds {MAX_CHAIN_DEPTH} levels",
                    branch.name
                )));
            }
            current = self.catalog.get_branch_by_id(parent_id).await?;
            lineage.push(current.clone());
        }
        lineage.reverse();

        let mut segments = Vec::with_capacity(lineage.len());
        for pair in lineage.windows(2) {
            segments.push(ChainSegment {
                branch_id: pair[0].id,
                after: pair[0].base_lsn,
                up_to: pair[1].base_lsn,
            });
        }
        segments.push(ChainSegment {
            branch_id: branch.id,
            after: branch.base_lsn,
            up_to,
        });

        Ok(segments)
    }

    /// All records in the branch's view up to `up_to`, optionally scoped to
    /// one collection, in ascending LSN order.
    pub async fn chain_records(
        &self,
        branch: &BranchDescriptor,
        collection: Option<&str>,
        up_to: Lsn,
    ) -> TimberResult<Vec<WalRecord>> {
        let mut records = Vec::new();
        for segment in self.chain_segments(branch, up_to).await? {
            if segment.up_to <= segment.after {
                continue;
            }
            let entries = self
                .wal
                .get_branch_entries(
                    segment.branch_id,
                    collection,
                    segment.after.next(),
                    segment.up_to,
                )
                .await?;
            records.extend(entries);
        }
        Ok(records)
    }

    /// Reconstructs one collection's state at `lsn`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` when `lsn` lies outside the branch's
    /// `[base_lsn, head_lsn]`.
    pub async fn materialize_at_lsn(
        &self,
        branch: &BranchDescriptor,
        collection: &str,
        lsn: Lsn,
    ) -> TimberResult<Arc<CollectionState>> {
        if lsn < branch.base_lsn {
            return Err(TimberError::out_of_range(format!(
                "LSN {} is before branch base LSN {}",
                lsn, branch.base_lsn
            )));
        }
        if lsn > branch.head_lsn {
            return Err(TimberError::out_of_range(format!(
                "LSN {} is beyond branch head {}",
                lsn, branch.head_lsn
            )));
        }

        if let Some(state) = self.cache.get(branch.id, collection, lsn).await {
            return Ok(state);
        }

        let records = self.chain_records(branch, Some(collection), lsn).await?;
        debug!(
            branch = %branch.name,
            collection,
            %lsn,
            records = records.len(),
            "materializing collection state"
        );
        let state = Arc::new(replay(&records)?);
        self.cache
            .insert(branch.id, collection, lsn, Arc::clone(&state))
            .await;
        Ok(state)
    }

    /// Resolves a timestamp to the largest LSN in the branch's view whose
    /// record is at or before it.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` when no record in the view is old enough: the
    /// caller asked about a time before any data existed on this branch.
    pub async fn resolve_time(
        &self,
        branch: &BranchDescriptor,
        at_or_before: DateTime<Utc>,
    ) -> TimberResult<Lsn> {
        let records = self.chain_records(branch, None, branch.head_lsn).await?;
        records
            .iter()
            .filter(|r| r.timestamp <= at_or_before)
            .map(|r| r.lsn)
            .max()
            .ok_or_else(|| {
                TimberError::out_of_range(format!(
                    "no records on branch `{}` at or before {at_or_before}",
                    branch.name
                ))
            })
    }

    /// Reconstructs one collection's state as of a wall-clock instant.
    ///
    /// Returns the resolved LSN alongside the state.
    pub async fn materialize_at_time(
        &self,
        branch: &BranchDescriptor,
        collection: &str,
        at_or_before: DateTime<Utc>,
    ) -> TimberResult<(Lsn, Arc<CollectionState>)> {
        let lsn = self.resolve_time(branch, at_or_before).await?;
        let state = self.materialize_at_lsn(branch, collection, lsn).await?;
        Ok((lsn, state))
    }

    /// Names of all collections touched in the branch's view up to `up_to`.
    pub async fn collections_in_chain(
        &self,
        branch: &BranchDescriptor,
        up_to: Lsn,
    ) -> TimberResult<BTreeSet<String>> {
        Ok(self
            .chain_records(branch, None, up_to)
            .await?
            .into_iter()
            .filter(|r| !r.collection.is_empty())
            .map(|r| r.collection)
            .collect())
    }

    /// Drops cached state for a branch after a write to it.
    pub async fn invalidate_branch(&self, branch_id: BranchId) {
        self.cache.invalidate_branch(branch_id).await;
    }
}

/// Replays data records, in the given (ascending LSN) order, into a state
/// map. Non-data markers are skipped.
pub fn replay(records: &[WalRecord]) -> TimberResult<CollectionState> {
    let mut state = CollectionState::new();

    for record in records {
        if !record.op.is_data_op() {
            continue;
        }
        let payload = record.decode_payload()?;

        match (record.op, payload) {
            (Operation::Insert, RecordPayload::Insert(doc)) => {
                let id = if record.document_id.is_empty() {
                    doc.get("_id").and_then(|v| v.id_string()).ok_or_else(|| {
                        TimberError::internal(format!(
                            "insert record {} carries no document identity",
                            record.lsn
                        ))
                    })?
                } else {
                    record.document_id.clone()
                };
                state.insert(id, doc);
            }
            (Operation::Update, RecordPayload::Update { filter, update }) => {
                let spec = UpdateSpec::parse(&update)?;
                if record.document_id.is_empty() {
                    let parsed = Filter::parse(&filter)?;
                    for doc in state.values_mut().filter(|doc| parsed.matches(doc)) {
                        spec.apply(doc)?;
                    }
                } else if let Some(doc) = state.get_mut(&record.document_id) {
                    spec.apply(doc)?;
                }
                // An identity update against an absent document is a no-op
                // on state; the record itself stays in the log.
            }
            (Operation::Delete, RecordPayload::Delete(filter)) => {
                if record.document_id.is_empty() {
                    let parsed = Filter::parse(&filter)?;
                    state.retain(|_, doc| !parsed.matches(doc));
                } else {
                    state.remove(&record.document_id);
                }
            }
            (op, payload) => {
                return Err(TimberError::internal(format!(
                    "record {} pairs op {} with mismatched payload {payload:?}",
                    record.lsn,
                    op.as_str()
                )));
            }
        }
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use timberdb_core::{Document, NewRecord, ProjectId};

    fn doc(v: serde_json::Value) -> Document {
        Document::from_json(v).unwrap()
    }

    fn record(lsn: i64, op: Operation, doc_id: &str, payload: RecordPayload) -> WalRecord {
        let new = NewRecord::new(
            ProjectId::new(),
            BranchId::new(),
            op,
            "users",
            doc_id,
            &payload,
        )
        .unwrap();
        WalRecord::commit(new, Lsn::new(lsn), Utc::now())
    }

    #[test]
    fn test_replay_insert_update_delete() {
        let records = vec![
            record(
                1,
                Operation::Insert,
                "u1",
                RecordPayload::Insert(doc(json!({"_id": "u1", "name": "Alice", "age": 30}))),
            ),
            record(
                2,
                Operation::Insert,
                "u2",
                RecordPayload::Insert(doc(json!({"_id": "u2", "name": "Bob", "age": 25}))),
            ),
            record(
                3,
                Operation::Update,
                "u1",
                RecordPayload::Update {
                    filter: doc(json!({"_id": "u1"})),
                    update: doc(json!({"$set": {"age": 31, "city": "NY"}})),
                },
            ),
            record(
                4,
                Operation::Delete,
                "u2",
                RecordPayload::Delete(doc(json!({"_id": "u2"}))),
            ),
        ];

        let state = replay(&records).unwrap();
        assert_eq!(state.len(), 1);
        assert_eq!(
            state.get("u1").unwrap(),
            &doc(json!({"_id": "u1", "name": "Alice", "age": 31, "city": "NY"}))
        );
    }

    #[test]
    fn test_replay_update_missing_identity_is_noop() {
        let records = vec![record(
            1,
            Operation::Update,
            "ghost",
            RecordPayload::Update {
                filter: doc(json!({"_id": "ghost"})),
                update: doc(json!({"$set": {"x": 1}})),
            },
        )];
        assert!(replay(&records).unwrap().is_empty());
    }

    #[test]
    fn test_replay_filter_update_touches_all_matches() {
        let records = vec![
            record(
                1,
                Operation::Insert,
                "u1",
                RecordPayload::Insert(doc(json!({"_id": "u1", "tier": "free"}))),
            ),
            record(
                2,
                Operation::Insert,
                "u2",
                RecordPayload::Insert(doc(json!({"_id": "u2", "tier": "free"}))),
            ),
            record(
                3,
                Operation::Insert,
                "u3",
                RecordPayload::Insert(doc(json!({"_id": "u3", "tier": "pro"}))),
            ),
            record(
                4,
                Operation::Update,
                "",
                RecordPayload::Update {
                    filter: doc(json!({"tier": "free"})),
                    update: doc(json!({"$set": {"migrated": true}})),
                },
            ),
        ];

        let state = replay(&records).unwrap();
        assert_eq!(
            state.get("u1").unwrap().get("migrated"),
            Some(&timberdb_core::Value::Bool(true))
        );
        assert_eq!(
            state.get("u2").unwrap().get("migrated"),
            Some(&timberdb_core::Value::Bool(true))
        );
        assert_eq!(state.get("u3").unwrap().get("migrated"), None);
    }

    #[test]
    fn test_replay_filter_delete() {
        let records = vec![
            record(
                1,
                Operation::Insert,
                "u1",
                RecordPayload::Insert(doc(json!({"_id": "u1", "age": 30}))),
            ),
            record(
                2,
                Operation::Insert,
                "u2",
                RecordPayload::Insert(doc(json!({"_id": "u2", "age": 17}))),
            ),
            record(
                3,
                Operation::Delete,
                "",
                RecordPayload::Delete(doc(json!({"age": {"$lt": 18}}))),
            ),
        ];

        let state = replay(&records).unwrap();
        assert_eq!(state.len(), 1);
        assert!(state.contains_key("u1"));
    }

    #[test]
    fn test_replay_skips_markers() {
        let new = NewRecord::new(
            ProjectId::new(),
            BranchId::new(),
            Operation::CreateBranch,
            "",
            "",
            &RecordPayload::None,
        )
        .unwrap();
        let records = vec![WalRecord::commit(new, Lsn::FIRST, Utc::now())];
        assert!(replay(&records).unwrap().is_empty());
    }

    #[test]
    fn test_replay_no_match_filter_update_is_noop() {
        let records = vec![
            record(
                1,
                Operation::Insert,
                "u1",
                RecordPayload::Insert(doc(json!({"_id": "u1", "age": 30}))),
            ),
            record(
                2,
                Operation::Update,
                "",
                RecordPayload::Update {
                    filter: doc(json!({"age": {"$gt": 100}})),
                    update: doc(json!({"$set": {"flag": true}})),
                },
            ),
        ];

        let state = replay(&records).unwrap();
        assert_eq!(state.get("u1").unwrap().get("flag"), None);
    }
}
