use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BranchId, ProjectId};

/// Project metadata. A project groups branches and always owns a `main`
/// branch created in the same logical act.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    /// Stable project identifier.
    pub id: ProjectId,
    /// Project name, unique across the metadata store.
    pub name: String,
    /// The project's default branch.
    pub main_branch_id: BranchId,
    /// Creation timestamp in UTC.
    pub created_at: DateTime<Utc>,
}

impl ProjectDescriptor {
    /// Creates a project descriptor pointing at its `main` branch.
    #[must_use]
    pub fn new(name: impl Into<String>, main_branch_id: BranchId) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            main_branch_id,
            created_at: Utc::now(),
        }
    }
}
