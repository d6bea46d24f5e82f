use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BranchId, ProjectId};
use crate::lsn::Lsn;

/// Name given to every project's default branch.
pub const MAIN_BRANCH: &str = "main";

/// Lifecycle status of a branch.
///
/// `Active -> PendingDelete` on soft delete, `PendingDelete -> Deleted` once
/// the retention window elapses, with a recovery edge back to `Active`
/// inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    /// Branch accepts reads and writes.
    Active,
    /// Soft-deleted; recoverable until the retention window elapses.
    PendingDelete,
    /// Retired by the retention sweeper; metadata kept for bookkeeping only.
    Deleted,
}

impl BranchStatus {
    /// Canonical lowercase string used in persistence and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PendingDelete => "pending_delete",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for BranchStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "pending_delete" => Ok(Self::PendingDelete),
            "deleted" => Ok(Self::Deleted),
            _ => Err(()),
        }
    }
}

/// Mutable branch metadata. Branches hold only LSN coordinates into the WAL,
/// never record copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchDescriptor {
    /// Stable branch identifier.
    pub id: BranchId,
    /// Owning project.
    pub project_id: ProjectId,
    /// Branch name, unique among the project's ACTIVE branches.
    pub name: String,
    /// Parent branch; `None` only for `main`.
    pub parent_id: Option<BranchId>,
    /// Fork point: inclusive upper bound of the view inherited from the
    /// parent chain.
    pub base_lsn: Lsn,
    /// Most recent record belonging to this branch.
    pub head_lsn: Lsn,
    /// LSN of this branch's CREATE_BRANCH record.
    pub created_lsn: Lsn,
    /// Lifecycle status.
    pub status: BranchStatus,
    /// Creation timestamp in UTC.
    pub created_at: DateTime<Utc>,
    /// Soft-deletion timestamp, set when entering `PendingDelete`.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BranchDescriptor {
    /// Creates an ACTIVE branch forked at `fork_lsn`.
    #[must_use]
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        parent_id: Option<BranchId>,
        fork_lsn: Lsn,
        created_lsn: Lsn,
    ) -> Self {
        Self {
            id: BranchId::new(),
            project_id,
            name: name.into(),
            parent_id,
            base_lsn: fork_lsn,
            head_lsn: fork_lsn,
            created_lsn,
            status: BranchStatus::Active,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// `true` for the project's default branch.
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.parent_id.is_none()
    }

    /// `true` when the branch accepts operations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == BranchStatus::Active
    }

    /// `true` when `lsn` lies inside the branch's addressable range.
    #[must_use]
    pub fn contains_lsn(&self, lsn: Lsn) -> bool {
        self.base_lsn <= lsn && lsn <= self.head_lsn
    }

    /// Marks the branch soft-deleted.
    pub fn mark_pending_delete(&mut self) {
        self.status = BranchStatus::PendingDelete;
        self.deleted_at = Some(Utc::now());
    }

    /// Restores a soft-deleted branch to ACTIVE.
    pub fn recover(&mut self) {
        self.status = BranchStatus::Active;
        self.deleted_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            BranchStatus::Active,
            BranchStatus::PendingDelete,
            BranchStatus::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<BranchStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_fork_invariants() {
        let branch = BranchDescriptor::new(
            ProjectId::new(),
            "feat",
            Some(BranchId::new()),
            Lsn::new(10),
            Lsn::new(11),
        );
        assert_eq!(branch.base_lsn, branch.head_lsn);
        assert!(branch.contains_lsn(Lsn::new(10)));
        assert!(!branch.contains_lsn(Lsn::new(9)));
        assert!(!branch.is_main());
    }

    #[test]
    fn test_soft_delete_cycle() {
        let mut branch =
            BranchDescriptor::new(ProjectId::new(), MAIN_BRANCH, None, Lsn::FIRST, Lsn::FIRST);
        assert!(branch.is_main());
        branch.mark_pending_delete();
        assert_eq!(branch.status, BranchStatus::PendingDelete);
        assert!(branch.deleted_at.is_some());
        branch.recover();
        assert!(branch.is_active());
        assert!(branch.deleted_at.is_none());
    }
}
