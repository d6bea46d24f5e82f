//! File-backed catalog.
//!
//! Metadata lives in memory behind a single RwLock; every mutation rewrites
//! a JSON snapshot through a temp file and an atomic rename, so a crash
//! leaves either the old or the new catalog on disk, never a torn one. An
//! in-memory mode (no snapshot path) backs tests and ephemeral engines.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use timberdb_core::{
    BranchDescriptor, BranchId, BranchStatus, Lsn, ProjectDescriptor, ProjectId, TimberError,
    TimberResult,
};

use super::{Catalog, CatalogStats};

#[derive(Default)]
struct CatalogState {
    projects: HashMap<ProjectId, ProjectDescriptor>,
    branches: HashMap<BranchId, BranchDescriptor>,
}

impl CatalogState {
    fn active_name_taken(&self, project_id: ProjectId, name: &str, ignore: Option<BranchId>) -> bool {
        self.branches.values().any(|b| {
            b.project_id == project_id
                && b.status == BranchStatus::Active
                && b.name == name
                && Some(b.id) != ignore
        })
    }

    fn has_active_children(&self, id: BranchId) -> bool {
        self.branches
            .values()
            .any(|b| b.parent_id == Some(id) && b.status == BranchStatus::Active)
    }
}

/// Serialized snapshot layout.
#[derive(Serialize, Deserialize, Default)]
struct CatalogSnapshot {
    projects: Vec<ProjectDescriptor>,
    branches: Vec<BranchDescriptor>,
}

/// Catalog over in-memory maps with optional atomic JSON persistence.
pub struct FileCatalog {
    state: RwLock<CatalogState>,
    snapshot_path: Option<PathBuf>,
}

impl FileCatalog {
    /// Opens (or initializes) a catalog persisted at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Io`/`Deserialization` when an existing snapshot cannot be
    /// read or parsed.
    pub fn open(path: impl AsRef<Path>) -> TimberResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut state = CatalogState::default();
        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let snapshot: CatalogSnapshot = serde_json::from_slice(&bytes)?;
            info!(
                path = %path.display(),
                projects = snapshot.projects.len(),
                branches = snapshot.branches.len(),
                "loaded catalog snapshot"
            );
            state.projects = snapshot.projects.into_iter().map(|p| (p.id, p)).collect();
            state.branches = snapshot.branches.into_iter().map(|b| (b.id, b)).collect();
        }

        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
        })
    }

    /// Catalog without persistence; state dies with the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            snapshot_path: None,
        }
    }

    /// Writes the snapshot through a temp file and atomic rename. Called
    /// with the state lock held so snapshots are serialized.
    fn persist(&self, state: &CatalogState) -> TimberResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let snapshot = CatalogSnapshot {
            projects: state.projects.values().cloned().collect(),
            branches: state.branches.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| TimberError::Serialization(e.to_string()))?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| TimberError::storage("catalog persist", e.to_string()))?;
        tmp.write_all(&bytes)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| TimberError::storage("catalog persist", e.to_string()))?;
        tmp.persist(path)
            .map_err(|e| TimberError::storage("catalog persist", e.to_string()))?;

        debug!(path = %path.display(), "persisted catalog snapshot");
        Ok(())
    }
}

#[async_trait]
impl Catalog for FileCatalog {
    async fn insert_project(&self, project: ProjectDescriptor) -> TimberResult<()> {
        let mut state = self.state.write();
        if state.projects.values().any(|p| p.name == project.name) {
            return Err(TimberError::conflict(format!(
                "project `{}` already exists",
                project.name
            )));
        }
        state.projects.insert(project.id, project);
        self.persist(&state)
    }

    async fn get_project(&self, name: &str) -> TimberResult<ProjectDescriptor> {
        self.state
            .read()
            .projects
            .values()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| TimberError::not_found("project", name))
    }

    async fn get_project_by_id(&self, id: ProjectId) -> TimberResult<ProjectDescriptor> {
        self.state
            .read()
            .projects
            .get(&id)
            .cloned()
            .ok_or_else(|| TimberError::not_found("project", id.to_string()))
    }

    async fn list_projects(&self) -> TimberResult<Vec<ProjectDescriptor>> {
        let mut projects: Vec<_> = self.state.read().projects.values().cloned().collect();
        projects.sort_by_key(|p| p.created_at);
        Ok(projects)
    }

    async fn delete_project(&self, id: ProjectId) -> TimberResult<()> {
        let mut state = self.state.write();
        if state.projects.remove(&id).is_none() {
            return Err(TimberError::not_found("project", id.to_string()));
        }
        state.branches.retain(|_, b| b.project_id != id);
        self.persist(&state)
    }

    async fn insert_branch(&self, branch: BranchDescriptor) -> TimberResult<()> {
        let mut state = self.state.write();

        if !state.projects.contains_key(&branch.project_id) {
            return Err(TimberError::not_found(
                "project",
                branch.project_id.to_string(),
            ));
        }
        if state.active_name_taken(branch.project_id, &branch.name, None) {
            return Err(TimberError::conflict(format!(
                "branch `{}` already exists in project",
                branch.name
            )));
        }

        if let Some(parent_id) = branch.parent_id {
            let parent = state
                .branches
                .get(&parent_id)
                .ok_or_else(|| TimberError::not_found("branch", parent_id.to_string()))?;
            if !parent.is_active() {
                return Err(TimberError::conflict(format!(
                    "parent branch `{}` is not active",
                    parent.name
                )));
            }
            if !parent.contains_lsn(branch.base_lsn) {
                return Err(TimberError::out_of_range(format!(
                    "fork LSN {} outside parent range [{}, {}]",
                    branch.base_lsn, parent.base_lsn, parent.head_lsn
                )));
            }
        }

        state.branches.insert(branch.id, branch);
        self.persist(&state)
    }

    async fn get_branch(
        &self,
        project_id: ProjectId,
        name: &str,
    ) -> TimberResult<BranchDescriptor> {
        let state = self.state.read();
        // Prefer the ACTIVE holder of the name; fall back to the most
        // recently soft-deleted one so recovery can find it.
        let mut candidates: Vec<_> = state
            .branches
            .values()
            .filter(|b| b.project_id == project_id && b.name == name)
            .collect();
        candidates.sort_by_key(|b| (b.status != BranchStatus::Active, std::cmp::Reverse(b.created_at)));
        candidates
            .first()
            .map(|b| (*b).clone())
            .ok_or_else(|| TimberError::not_found("branch", name))
    }

    async fn get_branch_by_id(&self, id: BranchId) -> TimberResult<BranchDescriptor> {
        self.state
            .read()
            .branches
            .get(&id)
            .cloned()
            .ok_or_else(|| TimberError::not_found("branch", id.to_string()))
    }

    async fn list_branches(
        &self,
        project_id: ProjectId,
        include_deleted: bool,
    ) -> TimberResult<Vec<BranchDescriptor>> {
        let mut branches: Vec<_> = self
            .state
            .read()
            .branches
            .values()
            .filter(|b| {
                b.project_id == project_id && (include_deleted || b.status == BranchStatus::Active)
            })
            .cloned()
            .collect();
        branches.sort_by_key(|b| b.created_at);
        Ok(branches)
    }

    async fn advance_head(&self, id: BranchId, new_lsn: Lsn) -> TimberResult<()> {
        let mut state = self.state.write();
        let branch = state
            .branches
            .get_mut(&id)
            .ok_or_else(|| TimberError::not_found("branch", id.to_string()))?;
        if new_lsn <= branch.head_lsn {
            return Err(TimberError::out_of_range(format!(
                "head advance to {} would not move past {}",
                new_lsn, branch.head_lsn
            )));
        }
        branch.head_lsn = new_lsn;
        self.persist(&state)
    }

    async fn reset_head(&self, id: BranchId, target: Lsn) -> TimberResult<BranchDescriptor> {
        let mut state = self.state.write();
        let branch = state
            .branches
            .get_mut(&id)
            .ok_or_else(|| TimberError::not_found("branch", id.to_string()))?;
        if target < branch.base_lsn {
            return Err(TimberError::out_of_range(format!(
                "reset target {} is before branch base LSN {}",
                target, branch.base_lsn
            )));
        }
        if target > branch.head_lsn {
            return Err(TimberError::out_of_range(format!(
                "reset target {} is beyond branch head {}",
                target, branch.head_lsn
            )));
        }
        branch.head_lsn = target;
        let updated = branch.clone();
        self.persist(&state)?;
        Ok(updated)
    }

    async fn mark_pending_delete(&self, id: BranchId) -> TimberResult<BranchDescriptor> {
        let mut state = self.state.write();
        let branch = state
            .branches
            .get(&id)
            .ok_or_else(|| TimberError::not_found("branch", id.to_string()))?;

        if branch.is_main() {
            return Err(TimberError::conflict("the main branch cannot be deleted"));
        }
        if branch.status != BranchStatus::Active {
            return Err(TimberError::conflict(format!(
                "branch `{}` is not active",
                branch.name
            )));
        }
        if state.has_active_children(id) {
            return Err(TimberError::conflict(format!(
                "branch `{}` has active child branches",
                branch.name
            )));
        }

        let branch = state.branches.get_mut(&id).expect("checked above");
        branch.mark_pending_delete();
        let updated = branch.clone();
        self.persist(&state)?;
        Ok(updated)
    }

    async fn recover_branch(&self, id: BranchId) -> TimberResult<BranchDescriptor> {
        let mut state = self.state.write();
        let branch = state
            .branches
            .get(&id)
            .ok_or_else(|| TimberError::not_found("branch", id.to_string()))?;

        if branch.status != BranchStatus::PendingDelete {
            return Err(TimberError::conflict(format!(
                "branch `{}` is not pending deletion",
                branch.name
            )));
        }
        if state.active_name_taken(branch.project_id, &branch.name, Some(id)) {
            return Err(TimberError::conflict(format!(
                "branch name `{}` was reclaimed by another active branch",
                branch.name
            )));
        }

        let branch = state.branches.get_mut(&id).expect("checked above");
        branch.recover();
        let updated = branch.clone();
        self.persist(&state)?;
        Ok(updated)
    }

    async fn mark_deleted(&self, id: BranchId) -> TimberResult<()> {
        let mut state = self.state.write();
        let branch = state
            .branches
            .get_mut(&id)
            .ok_or_else(|| TimberError::not_found("branch", id.to_string()))?;
        if branch.status != BranchStatus::PendingDelete {
            return Err(TimberError::conflict(format!(
                "branch `{}` is not pending deletion",
                branch.name
            )));
        }
        branch.status = BranchStatus::Deleted;
        self.persist(&state)
    }

    async fn stats(&self) -> TimberResult<CatalogStats> {
        let state = self.state.read();
        Ok(CatalogStats {
            projects: state.projects.len(),
            active_branches: state
                .branches
                .values()
                .filter(|b| b.status == BranchStatus::Active)
                .count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use timberdb_core::MAIN_BRANCH;

    fn seed_project(name: &str) -> (ProjectDescriptor, BranchDescriptor) {
        let mut main =
            BranchDescriptor::new(ProjectId::new(), MAIN_BRANCH, None, Lsn::FIRST, Lsn::FIRST);
        let project = ProjectDescriptor::new(name, main.id);
        main.project_id = project.id;
        (project, main)
    }

    #[tokio::test]
    async fn test_project_name_uniqueness() {
        let catalog = FileCatalog::in_memory();
        let (project, main) = seed_project("demo");
        catalog.insert_project(project).await.unwrap();
        catalog.insert_branch(main).await.unwrap();

        let (duplicate, _) = seed_project("demo");
        assert!(matches!(
            catalog.insert_project(duplicate).await,
            Err(TimberError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_branch_name_uniqueness_among_active() {
        let catalog = FileCatalog::in_memory();
        let (project, main) = seed_project("demo");
        let project_id = project.id;
        let main_id = main.id;
        catalog.insert_project(project).await.unwrap();
        catalog.insert_branch(main).await.unwrap();

        let feat = BranchDescriptor::new(
            project_id,
            "feat",
            Some(main_id),
            Lsn::FIRST,
            Lsn::new(2),
        );
        let feat_id = feat.id;
        catalog.insert_branch(feat).await.unwrap();

        let duplicate = BranchDescriptor::new(
            project_id,
            "feat",
            Some(main_id),
            Lsn::FIRST,
            Lsn::new(3),
        );
        assert!(matches!(
            catalog.insert_branch(duplicate.clone()).await,
            Err(TimberError::Conflict { .. })
        ));

        // After a soft delete the name is free again.
        catalog.mark_pending_delete(feat_id).await.unwrap();
        catalog.insert_branch(duplicate).await.unwrap();
    }

    #[tokio::test]
    async fn test_fork_lsn_must_lie_in_parent_range() {
        let catalog = FileCatalog::in_memory();
        let (project, main) = seed_project("demo");
        let project_id = project.id;
        let main_id = main.id;
        catalog.insert_project(project).await.unwrap();
        catalog.insert_branch(main).await.unwrap();
        catalog.advance_head(main_id, Lsn::new(5)).await.unwrap();

        let too_far = BranchDescriptor::new(
            project_id,
            "late",
            Some(main_id),
            Lsn::new(9),
            Lsn::new(10),
        );
        assert!(matches!(
            catalog.insert_branch(too_far).await,
            Err(TimberError::OutOfRange { .. })
        ));

        let in_range = BranchDescriptor::new(
            project_id,
            "ok",
            Some(main_id),
            Lsn::new(3),
            Lsn::new(6),
        );
        catalog.insert_branch(in_range).await.unwrap();
    }

    #[tokio::test]
    async fn test_head_movement_rules() {
        let catalog = FileCatalog::in_memory();
        let (project, main) = seed_project("demo");
        let main_id = main.id;
        catalog.insert_project(project).await.unwrap();
        catalog.insert_branch(main).await.unwrap();

        catalog.advance_head(main_id, Lsn::new(4)).await.unwrap();
        assert!(matches!(
            catalog.advance_head(main_id, Lsn::new(4)).await,
            Err(TimberError::OutOfRange { .. })
        ));
        assert!(matches!(
            catalog.advance_head(main_id, Lsn::new(2)).await,
            Err(TimberError::OutOfRange { .. })
        ));

        // Reset may move backward, but never below base.
        let reset = catalog.reset_head(main_id, Lsn::new(2)).await.unwrap();
        assert_eq!(reset.head_lsn, Lsn::new(2));
        assert!(matches!(
            catalog.reset_head(main_id, Lsn::ZERO).await,
            Err(TimberError::OutOfRange { .. })
        ));
        assert!(matches!(
            catalog.reset_head(main_id, Lsn::new(3)).await,
            Err(TimberError::OutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_deletion_rules() {
        let catalog = FileCatalog::in_memory();
        let (project, main) = seed_project("demo");
        let project_id = project.id;
        let main_id = main.id;
        catalog.insert_project(project).await.unwrap();
        catalog.insert_branch(main).await.unwrap();

        assert!(matches!(
            catalog.mark_pending_delete(main_id).await,
            Err(TimberError::Conflict { .. })
        ));

        let parent = BranchDescriptor::new(
            project_id,
            "parent",
            Some(main_id),
            Lsn::FIRST,
            Lsn::new(2),
        );
        let parent_id = parent.id;
        catalog.insert_branch(parent).await.unwrap();
        let child = BranchDescriptor::new(
            project_id,
            "child",
            Some(parent_id),
            Lsn::FIRST,
            Lsn::new(3),
        );
        let child_id = child.id;
        catalog.insert_branch(child).await.unwrap();

        assert!(matches!(
            catalog.mark_pending_delete(parent_id).await,
            Err(TimberError::Conflict { .. })
        ));

        catalog.mark_pending_delete(child_id).await.unwrap();
        let deleted = catalog.mark_pending_delete(parent_id).await.unwrap();
        assert_eq!(deleted.status, BranchStatus::PendingDelete);
        assert!(deleted.deleted_at.is_some());

        // Recovery flips the branch back and blocks the sweeper path.
        let recovered = catalog.recover_branch(parent_id).await.unwrap();
        assert!(recovered.is_active());
        assert!(catalog.mark_deleted(parent_id).await.is_err());

        catalog.mark_deleted(child_id).await.unwrap();
        let visible = catalog.list_branches(project_id, false).await.unwrap();
        assert_eq!(visible.len(), 2);
        let all = catalog.list_branches(project_id, true).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");

        let (project, main) = seed_project("demo");
        let project_id = project.id;
        let main_id = main.id;
        {
            let catalog = FileCatalog::open(&path).unwrap();
            catalog.insert_project(project).await.unwrap();
            catalog.insert_branch(main).await.unwrap();
            catalog.advance_head(main_id, Lsn::new(7)).await.unwrap();
        }

        let catalog = FileCatalog::open(&path).unwrap();
        let loaded = catalog.get_project("demo").await.unwrap();
        assert_eq!(loaded.id, project_id);
        let main = catalog.get_branch(project_id, MAIN_BRANCH).await.unwrap();
        assert_eq!(main.head_lsn, Lsn::new(7));

        let stats = catalog.stats().await.unwrap();
        assert_eq!(stats, CatalogStats { projects: 1, active_branches: 1 });
    }
}
