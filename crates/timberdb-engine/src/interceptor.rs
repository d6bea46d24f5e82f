//! Write interception.
//!
//! The interceptor is the only producer of INSERT/UPDATE/DELETE records and
//! the only component that advances a branch head during normal operation.
//! It pins down document identity, serializes the payload, appends, and
//! then moves the head to the committed LSN. Results mirror the driver
//! contract; update/delete counts are reported without consulting
//! materialized state.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use timberdb_core::{
    BranchDescriptor, BranchId, Document, Lsn, NewRecord, Operation, RecordPayload, TimberError,
    TimberResult, Value, META_IS_FILTER,
};
use timberdb_storage::{Catalog, WalStore};

use crate::cache::StateCache;
use crate::filter::Filter;
use crate::update::UpdateSpec;

/// Result of a single insert.
#[derive(Debug, Clone)]
pub struct InsertOneResult {
    /// The document's `_id`, generated when the caller omitted it.
    pub inserted_id: String,
    /// Committed log position.
    pub lsn: Lsn,
}

/// Result of a batch insert. Each document got its own record and LSN;
/// records appended before a mid-batch failure remain visible.
#[derive(Debug, Clone)]
pub struct InsertManyResult {
    /// Identities in caller order.
    pub inserted_ids: Vec<String>,
    /// Log position of the batch's last record.
    pub last_lsn: Lsn,
}

/// Result of an update.
#[derive(Debug, Clone)]
pub struct UpdateResult {
    /// Reported match count (fixed at 1; see crate docs).
    pub matched: u64,
    /// Reported modification count (fixed at 1).
    pub modified: u64,
    /// Committed log position.
    pub lsn: Lsn,
}

/// Result of a delete.
#[derive(Debug, Clone)]
pub struct DeleteResult {
    /// Reported deletion count (fixed at 1).
    pub deleted: u64,
    /// Committed log position.
    pub lsn: Lsn,
}

/// Turns logical document operations into WAL records.
pub struct WriteInterceptor {
    wal: Arc<dyn WalStore>,
    catalog: Arc<dyn Catalog>,
    cache: StateCache,
}

impl WriteInterceptor {
    /// Creates an interceptor over the given stores.
    pub fn new(wal: Arc<dyn WalStore>, catalog: Arc<dyn Catalog>, cache: StateCache) -> Self {
        Self {
            wal,
            catalog,
            cache,
        }
    }

    /// Inserts one document, injecting a generated `_id` when absent.
    ///
    /// # Errors
    ///
    /// - `Validation` on an empty collection name or a non-scalar `_id`.
    /// - `Busy`/`Storage` from the append path.
    pub async fn insert_one(
        &self,
        branch: &BranchDescriptor,
        collection: &str,
        mut document: Document,
    ) -> TimberResult<InsertOneResult> {
        validate_collection(collection)?;
        let inserted_id = extract_or_inject_id(&mut document)?;

        let record = NewRecord::new(
            branch.project_id,
            branch.id,
            Operation::Insert,
            collection,
            inserted_id.clone(),
            &RecordPayload::Insert(document),
        )?;

        let lsn = self.wal.append(record).await?;
        self.advance(branch.id, lsn).await?;
        self.cache.invalidate_branch(branch.id).await;

        debug!(branch = %branch.name, collection, %lsn, id = %inserted_id, "insert committed");
        Ok(InsertOneResult { inserted_id, lsn })
    }

    /// Inserts a batch, one record and LSN per document, in caller order.
    ///
    /// # Errors
    ///
    /// `Validation` before any append when a document carries a non-scalar
    /// `_id`. A mid-batch failure reports the failing position and how many
    /// records were already appended; those records keep their LSNs.
    pub async fn insert_many(
        &self,
        branch: &BranchDescriptor,
        collection: &str,
        documents: Vec<Document>,
    ) -> TimberResult<InsertManyResult> {
        validate_collection(collection)?;
        if documents.is_empty() {
            return Err(TimberError::validation("insert_many requires documents"));
        }
        for (position, document) in documents.iter().enumerate() {
            if let Some(id) = document.get("_id") {
                if !id.is_identity_scalar() {
                    return Err(TimberError::validation(format!(
                        "document at position {position}: _id must be a scalar"
                    )));
                }
            }
        }

        let total = documents.len();
        let mut inserted_ids = Vec::with_capacity(total);
        let mut last_lsn = Lsn::ZERO;

        for (position, document) in documents.into_iter().enumerate() {
            match self.insert_one(branch, collection, document).await {
                Ok(result) => {
                    inserted_ids.push(result.inserted_id);
                    last_lsn = result.lsn;
                }
                Err(e) => {
                    let context = format!(
                        "insert_many failed at position {position}/{total} after {} appended records",
                        inserted_ids.len()
                    );
                    return Err(match e {
                        TimberError::Busy { message } => {
                            TimberError::busy(format!("{context}: {message}"))
                        }
                        other => TimberError::storage(context, other.to_string()),
                    });
                }
            }
        }

        Ok(InsertManyResult {
            inserted_ids,
            last_lsn,
        })
    }

    /// Records an update. When the filter is exactly `{_id: x}` the record
    /// carries that identity; otherwise it is flagged as a filter-form
    /// operation and replay resolves the matches.
    ///
    /// # Errors
    ///
    /// `Validation` on a malformed filter or update spec (unknown
    /// operators never reach the log).
    pub async fn update_one(
        &self,
        branch: &BranchDescriptor,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> TimberResult<UpdateResult> {
        validate_collection(collection)?;
        let parsed_filter = Filter::parse(&filter)?;
        UpdateSpec::parse(&update)?;

        let identity = parsed_filter.as_identity();
        let mut record = NewRecord::new(
            branch.project_id,
            branch.id,
            Operation::Update,
            collection,
            identity.clone().unwrap_or_default(),
            &RecordPayload::Update { filter, update },
        )?;
        if identity.is_none() {
            record = record.with_meta(META_IS_FILTER, "true");
        }

        let lsn = self.wal.append(record).await?;
        self.advance(branch.id, lsn).await?;
        self.cache.invalidate_branch(branch.id).await;

        Ok(UpdateResult {
            matched: 1,
            modified: 1,
            lsn,
        })
    }

    /// Records a delete, with the same identity rules as `update_one`.
    ///
    /// # Errors
    ///
    /// `Validation` on a malformed filter.
    pub async fn delete_one(
        &self,
        branch: &BranchDescriptor,
        collection: &str,
        filter: Document,
    ) -> TimberResult<DeleteResult> {
        validate_collection(collection)?;
        let parsed_filter = Filter::parse(&filter)?;

        let identity = parsed_filter.as_identity();
        let mut record = NewRecord::new(
            branch.project_id,
            branch.id,
            Operation::Delete,
            collection,
            identity.clone().unwrap_or_default(),
            &RecordPayload::Delete(filter),
        )?;
        if identity.is_none() {
            record = record.with_meta(META_IS_FILTER, "true");
        }

        let lsn = self.wal.append(record).await?;
        self.advance(branch.id, lsn).await?;
        self.cache.invalidate_branch(branch.id).await;

        Ok(DeleteResult { deleted: 1, lsn })
    }

    /// Records a collection-creation marker.
    pub async fn create_collection(
        &self,
        branch: &BranchDescriptor,
        collection: &str,
    ) -> TimberResult<Lsn> {
        validate_collection(collection)?;
        let record = NewRecord::new(
            branch.project_id,
            branch.id,
            Operation::CreateCollection,
            collection,
            "",
            &RecordPayload::None,
        )?;
        let lsn = self.wal.append(record).await?;
        self.advance(branch.id, lsn).await?;
        self.cache.invalidate_branch(branch.id).await;
        Ok(lsn)
    }

    /// Moves the branch head to a committed LSN. A lower-than-head result
    /// means a concurrent writer already advanced past us, which is fine:
    /// the record is covered. Any other failure after a committed append is
    /// an invariant problem, retried once and then surfaced as `Internal`.
    async fn advance(&self, branch_id: BranchId, lsn: Lsn) -> TimberResult<()> {
        match self.catalog.advance_head(branch_id, lsn).await {
            Ok(()) | Err(TimberError::OutOfRange { .. }) => Ok(()),
            Err(first) => match self.catalog.advance_head(branch_id, lsn).await {
                Ok(()) | Err(TimberError::OutOfRange { .. }) => Ok(()),
                Err(_) => Err(TimberError::internal(format!(
                    "branch head update failed after committed append at {lsn}: {first}"
                ))),
            },
        }
    }
}

fn validate_collection(collection: &str) -> TimberResult<()> {
    if collection.is_empty() {
        return Err(TimberError::validation("collection name is required"));
    }
    Ok(())
}

fn extract_or_inject_id(document: &mut Document) -> TimberResult<String> {
    match document.get("_id") {
        Some(value) => value.id_string().ok_or_else(|| {
            TimberError::validation(format!("_id must be a scalar, got {}", value.to_json()))
        }),
        None => {
            let id = Uuid::now_v7().to_string();
            document.insert("_id", Value::string(id.clone()));
            Ok(id)
        }
    }
}
