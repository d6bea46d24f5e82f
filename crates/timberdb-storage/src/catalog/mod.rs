//! Branch and project metadata catalog.
//!
//! The catalog is the authority on branch hierarchy invariants: name
//! uniqueness among ACTIVE siblings, fork points inside the parent's range,
//! monotonic head movement (with the restore-only reset path as the single
//! exception), and deletion rules for `main` and parents with live
//! children. Branches store only LSN coordinates; record bytes belong to
//! the WAL store.

mod file;

pub use file::FileCatalog;

use async_trait::async_trait;
use timberdb_core::{BranchDescriptor, BranchId, Lsn, ProjectDescriptor, ProjectId, TimberResult};

/// Counts used to publish catalog gauges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    /// Number of projects.
    pub projects: usize,
    /// Number of ACTIVE branches across all projects.
    pub active_branches: usize,
}

/// Persistent map of projects and branches.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Stores a new project.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the name is taken.
    async fn insert_project(&self, project: ProjectDescriptor) -> TimberResult<()>;

    /// Fetches a project by name.
    async fn get_project(&self, name: &str) -> TimberResult<ProjectDescriptor>;

    /// Fetches a project by id.
    async fn get_project_by_id(&self, id: ProjectId) -> TimberResult<ProjectDescriptor>;

    /// All projects ordered by creation time.
    async fn list_projects(&self) -> TimberResult<Vec<ProjectDescriptor>>;

    /// Removes a project and every branch it owns.
    async fn delete_project(&self, id: ProjectId) -> TimberResult<()>;

    /// Stores a new branch after validating hierarchy invariants.
    ///
    /// # Errors
    ///
    /// - `Conflict` when an ACTIVE sibling already uses the name.
    /// - `NotFound` when the project or named parent is missing.
    /// - `OutOfRange` when the fork point lies outside the parent's
    ///   `[base_lsn, head_lsn]`.
    async fn insert_branch(&self, branch: BranchDescriptor) -> TimberResult<()>;

    /// Fetches a branch by project and name (any status).
    async fn get_branch(&self, project_id: ProjectId, name: &str)
        -> TimberResult<BranchDescriptor>;

    /// Fetches a branch by id.
    async fn get_branch_by_id(&self, id: BranchId) -> TimberResult<BranchDescriptor>;

    /// Branches of a project ordered by creation time; soft-deleted and
    /// retired branches are included only when `include_deleted` is set.
    async fn list_branches(
        &self,
        project_id: ProjectId,
        include_deleted: bool,
    ) -> TimberResult<Vec<BranchDescriptor>>;

    /// Moves a branch head forward during a normal write.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` when `new_lsn <= head_lsn`.
    async fn advance_head(&self, id: BranchId, new_lsn: Lsn) -> TimberResult<()>;

    /// Moves a branch head backward during a restore. This is the only
    /// legal backward movement of a head.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` when `target` lies outside `[base_lsn, head_lsn]`.
    async fn reset_head(&self, id: BranchId, target: Lsn) -> TimberResult<BranchDescriptor>;

    /// Soft-deletes a branch.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` for `main`, for branches with ACTIVE children, or
    /// when the branch is not ACTIVE.
    async fn mark_pending_delete(&self, id: BranchId) -> TimberResult<BranchDescriptor>;

    /// Restores a PENDING_DELETE branch to ACTIVE.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the branch is not PENDING_DELETE or its name
    /// was reclaimed by a newer ACTIVE branch.
    async fn recover_branch(&self, id: BranchId) -> TimberResult<BranchDescriptor>;

    /// Retires a PENDING_DELETE branch (called by the retention sweeper).
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the branch is not PENDING_DELETE.
    async fn mark_deleted(&self, id: BranchId) -> TimberResult<()>;

    /// Counts for gauge publication.
    async fn stats(&self) -> TimberResult<CatalogStats>;
}
