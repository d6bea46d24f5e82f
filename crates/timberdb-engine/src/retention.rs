//! Branch retention sweeping.
//!
//! Soft-deleted branches sit in PENDING_DELETE until the configured
//! retention window elapses, then a sweep retires them to DELETED. The
//! sweeper is a pluggable background task; record-level garbage collection
//! (reclaiming unreachable log ranges) stays outside the core.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use timberdb_core::{BranchStatus, TimberResult};
use timberdb_storage::Catalog;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// PENDING_DELETE branches examined.
    pub checked: usize,
    /// Names of branches retired (or that would be, on a dry run).
    pub retired: Vec<String>,
    /// `true` when no state was changed.
    pub dry_run: bool,
}

impl SweepReport {
    /// Human-readable one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let action = if self.dry_run { "would retire" } else { "retired" };
        format!(
            "{} {} of {} pending branches",
            action,
            self.retired.len(),
            self.checked
        )
    }
}

/// Retires PENDING_DELETE branches whose retention window has elapsed.
pub struct RetentionSweeper {
    catalog: Arc<dyn Catalog>,
    retention: Duration,
}

impl RetentionSweeper {
    /// Creates a sweeper with the given retention window.
    pub fn new(catalog: Arc<dyn Catalog>, retention: Duration) -> Self {
        Self { catalog, retention }
    }

    /// Examines every PENDING_DELETE branch and retires the expired ones.
    /// With `dry_run` set, reports what would happen without mutating.
    ///
    /// # Errors
    ///
    /// Propagates catalog failures.
    pub async fn sweep(&self, dry_run: bool) -> TimberResult<SweepReport> {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        let now = Utc::now();
        let mut report = SweepReport {
            dry_run,
            ..SweepReport::default()
        };

        for project in self.catalog.list_projects().await? {
            for branch in self.catalog.list_branches(project.id, true).await? {
                if branch.status != BranchStatus::PendingDelete {
                    continue;
                }
                report.checked += 1;

                let Some(deleted_at) = branch.deleted_at else {
                    warn!(branch = %branch.name, "pending-delete branch has no deletion timestamp");
                    continue;
                };
                if deleted_at + retention > now {
                    continue;
                }

                if !dry_run {
                    self.catalog.mark_deleted(branch.id).await?;
                }
                report.retired.push(branch.name);
            }
        }

        if !report.retired.is_empty() {
            info!(summary = %report.summary(), "retention sweep");
        }
        Ok(report)
    }

    /// Runs `sweep` on a fixed cadence until the token is canceled.
    #[must_use]
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep(false).await {
                            warn!("retention sweep failed: {e}");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timberdb_core::{BranchDescriptor, Lsn, ProjectDescriptor, ProjectId, MAIN_BRANCH};
    use timberdb_storage::FileCatalog;

    async fn seed(catalog: &FileCatalog) -> (ProjectId, timberdb_core::BranchId) {
        let mut main =
            BranchDescriptor::new(ProjectId::new(), MAIN_BRANCH, None, Lsn::FIRST, Lsn::FIRST);
        let project = ProjectDescriptor::new("demo", main.id);
        main.project_id = project.id;
        let project_id = project.id;
        catalog.insert_project(project).await.unwrap();
        catalog.insert_branch(main.clone()).await.unwrap();

        let feat = BranchDescriptor::new(project_id, "feat", Some(main.id), Lsn::FIRST, Lsn::new(2));
        let feat_id = feat.id;
        catalog.insert_branch(feat).await.unwrap();
        (project_id, feat_id)
    }

    #[tokio::test]
    async fn test_sweep_respects_retention_window() {
        let catalog = Arc::new(FileCatalog::in_memory());
        let (_, feat_id) = seed(&catalog).await;
        catalog.mark_pending_delete(feat_id).await.unwrap();

        // A generous window: nothing should be retired yet.
        let sweeper = RetentionSweeper::new(
            Arc::clone(&catalog) as Arc<dyn Catalog>,
            Duration::from_secs(3600),
        );
        let report = sweeper.sweep(false).await.unwrap();
        assert_eq!(report.checked, 1);
        assert!(report.retired.is_empty());

        // A zero window retires immediately; dry run leaves state alone.
        let sweeper =
            RetentionSweeper::new(Arc::clone(&catalog) as Arc<dyn Catalog>, Duration::ZERO);
        let dry = sweeper.sweep(true).await.unwrap();
        assert_eq!(dry.retired, vec!["feat".to_string()]);
        assert_eq!(
            catalog.get_branch_by_id(feat_id).await.unwrap().status,
            BranchStatus::PendingDelete
        );

        let wet = sweeper.sweep(false).await.unwrap();
        assert_eq!(wet.retired, vec!["feat".to_string()]);
        assert_eq!(
            catalog.get_branch_by_id(feat_id).await.unwrap().status,
            BranchStatus::Deleted
        );
    }
}
