//! WAL record model.
//!
//! A record is immutable once appended. The payload travels through the core
//! as decoded bytes (bincode of [`RecordPayload`]); compression is applied by
//! the store at rest and stripped transparently on read.

use std::collections::BTreeMap;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TimberError, TimberResult};
use crate::ids::{BranchId, ProjectId};
use crate::lsn::Lsn;
use crate::value::Document;

/// Metadata key flagging an update/delete whose identity could not be
/// extracted from the filter.
pub const META_IS_FILTER: &str = "is_filter";

/// Logical operation recorded in the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Document insert (payload: full post-image).
    Insert,
    /// Document update (payload: filter + operator-form update spec).
    Update,
    /// Document delete (payload: filter).
    Delete,
    /// Collection creation marker.
    CreateCollection,
    /// Branch creation marker (also written for `main` at project creation).
    CreateBranch,
    /// Branch soft-deletion marker.
    DropBranch,
}

impl Operation {
    /// Canonical lowercase string stored in logs and metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::CreateCollection => "create_collection",
            Self::CreateBranch => "create_branch",
            Self::DropBranch => "drop_branch",
        }
    }

    /// `true` for operations that change document state in a collection.
    #[must_use]
    pub const fn is_data_op(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

impl FromStr for Operation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "create_collection" => Ok(Self::CreateCollection),
            "create_branch" => Ok(Self::CreateBranch),
            "drop_branch" => Ok(Self::DropBranch),
            _ => Err(()),
        }
    }
}

/// Typed payload carried by a WAL record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordPayload {
    /// Full post-image of the inserted document.
    Insert(Document),
    /// Filter plus operator-form update spec, exactly as supplied.
    Update {
        /// Match criteria.
        filter: Document,
        /// Operator-form update (`$set`, `$inc`, ...).
        update: Document,
    },
    /// Filter identifying the document(s) to remove.
    Delete(Document),
    /// Branch/collection markers carry no document payload.
    None,
}

impl RecordPayload {
    /// Serializes the payload into record bytes.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when encoding fails.
    pub fn encode(&self) -> TimberResult<Bytes> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(|e| TimberError::Serialization(e.to_string()))
    }

    /// Decodes payload bytes back into the typed form.
    ///
    /// # Errors
    ///
    /// Returns `Deserialization` when the bytes are corrupt.
    pub fn decode(bytes: &[u8]) -> TimberResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A record as handed to the WAL store for appending. The store allocates
/// the LSN and stamps the timestamp.
#[derive(Debug, Clone)]
pub struct NewRecord {
    /// Owning project.
    pub project_id: ProjectId,
    /// Branch the operation executed against.
    pub branch_id: BranchId,
    /// Logical operation.
    pub op: Operation,
    /// Target collection; empty for branch/project markers.
    pub collection: String,
    /// Stringified identity of the affected document; empty when unknown.
    pub document_id: String,
    /// Encoded payload (see [`RecordPayload::encode`]).
    pub payload: Bytes,
    /// Small key/value bag for flags such as `is_filter`.
    pub metadata: BTreeMap<String, String>,
}

impl NewRecord {
    /// Builds a record with an encoded payload and empty metadata.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when payload encoding fails.
    pub fn new(
        project_id: ProjectId,
        branch_id: BranchId,
        op: Operation,
        collection: impl Into<String>,
        document_id: impl Into<String>,
        payload: &RecordPayload,
    ) -> TimberResult<Self> {
        Ok(Self {
            project_id,
            branch_id,
            op,
            collection: collection.into(),
            document_id: document_id.into(),
            payload: payload.encode()?,
            metadata: BTreeMap::new(),
        })
    }

    /// Sets a metadata flag, builder-style.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An immutable, committed WAL record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    /// Unique, strictly increasing log position.
    pub lsn: Lsn,
    /// Wall-clock instant at append.
    pub timestamp: DateTime<Utc>,
    /// Owning project.
    pub project_id: ProjectId,
    /// Branch the operation executed against.
    pub branch_id: BranchId,
    /// Logical operation.
    pub op: Operation,
    /// Target collection; empty for branch/project markers.
    pub collection: String,
    /// Stringified identity of the affected document; empty when unknown.
    pub document_id: String,
    /// Decoded payload bytes (compression is a store-internal concern).
    pub payload: Bytes,
    /// Flags such as `is_filter`.
    pub metadata: BTreeMap<String, String>,
}

impl WalRecord {
    /// Stamps a [`NewRecord`] with its committed position and time.
    #[must_use]
    pub fn commit(new: NewRecord, lsn: Lsn, timestamp: DateTime<Utc>) -> Self {
        Self {
            lsn,
            timestamp,
            project_id: new.project_id,
            branch_id: new.branch_id,
            op: new.op,
            collection: new.collection,
            document_id: new.document_id,
            payload: new.payload,
            metadata: new.metadata,
        }
    }

    /// Decodes the typed payload.
    ///
    /// # Errors
    ///
    /// Returns `Deserialization` when the payload bytes are corrupt.
    pub fn decode_payload(&self) -> TimberResult<RecordPayload> {
        RecordPayload::decode(&self.payload)
    }

    /// `true` when this record carries a filter-form update/delete.
    #[must_use]
    pub fn is_filter_op(&self) -> bool {
        self.metadata.get(META_IS_FILTER).map(String::as_str) == Some("true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_string_round_trip() {
        for op in [
            Operation::Insert,
            Operation::Update,
            Operation::Delete,
            Operation::CreateCollection,
            Operation::CreateBranch,
            Operation::DropBranch,
        ] {
            assert_eq!(op.as_str().parse::<Operation>(), Ok(op));
        }
        assert!("upsert".parse::<Operation>().is_err());
    }

    #[test]
    fn test_payload_round_trip() {
        let filter = Document::from_json(json!({"_id": "u1"})).unwrap();
        let update = Document::from_json(json!({"$set": {"age": 31}})).unwrap();
        let payload = RecordPayload::Update { filter, update };

        let bytes = payload.encode().unwrap();
        assert_eq!(RecordPayload::decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_filter_flag() {
        let payload = RecordPayload::Delete(Document::new());
        let new = NewRecord::new(
            ProjectId::new(),
            BranchId::new(),
            Operation::Delete,
            "users",
            "",
            &payload,
        )
        .unwrap()
        .with_meta(META_IS_FILTER, "true");

        let record = WalRecord::commit(new, Lsn::FIRST, Utc::now());
        assert!(record.is_filter_op());
    }
}
