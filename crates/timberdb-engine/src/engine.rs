//! Engine assembly.
//!
//! [`Engine`] wires the WAL store, catalog, write interceptor, and
//! materializer together behind one typed API. It owns the metrics handle
//! and the cancellation token; every public operation checks the `enabled`
//! switch and the token before touching storage.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use timberdb_core::{
    BranchDescriptor, BranchId, Document, Lsn, Metrics, NewRecord, OpClass, Operation,
    ProjectDescriptor, ProjectId, RecordPayload, TimberConfig, TimberError, TimberResult,
    MAIN_BRANCH,
};
use timberdb_storage::{Catalog, FileCatalog, FileWalStore, FileWalStoreConfig, WalStore};

use crate::cache::StateCache;
use crate::interceptor::{
    DeleteResult, InsertManyResult, InsertOneResult, UpdateResult, WriteInterceptor,
};
use crate::materializer::Materializer;
use crate::monitor::{HealthMonitor, HealthReport};
use crate::retention::{RetentionSweeper, SweepReport};

/// Identifies the branch an operation executes against, optionally pinned
/// to a historical position for reads.
#[derive(Debug, Clone)]
pub struct BranchContext {
    /// Owning project.
    pub project_id: ProjectId,
    /// Target branch.
    pub branch_id: BranchId,
    /// Pin reads to this LSN.
    pub as_of_lsn: Option<Lsn>,
    /// Pin reads to this instant (ignored when `as_of_lsn` is set).
    pub as_of_time: Option<DateTime<Utc>>,
}

impl BranchContext {
    /// Context reading and writing at the branch head.
    #[must_use]
    pub fn new(project_id: ProjectId, branch_id: BranchId) -> Self {
        Self {
            project_id,
            branch_id,
            as_of_lsn: None,
            as_of_time: None,
        }
    }

    /// Pins reads to a historical LSN.
    #[must_use]
    pub fn at_lsn(mut self, lsn: Lsn) -> Self {
        self.as_of_lsn = Some(lsn);
        self
    }

    /// Pins reads to a historical instant.
    #[must_use]
    pub fn at_time(mut self, at: DateTime<Utc>) -> Self {
        self.as_of_time = Some(at);
        self
    }

    /// `true` when reads are pinned to the past.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.as_of_lsn.is_some() || self.as_of_time.is_some()
    }
}

/// The TimberDB core engine.
pub struct Engine {
    config: TimberConfig,
    wal: Arc<dyn WalStore>,
    catalog: Arc<dyn Catalog>,
    metrics: Metrics,
    cancel: CancellationToken,
    pub(crate) materializer: Materializer,
    interceptor: WriteInterceptor,
}

impl Engine {
    /// Opens an engine over durable file stores rooted at
    /// `config.storage.path`.
    ///
    /// # Errors
    ///
    /// Propagates store-open failures and configuration errors.
    pub async fn open(config: TimberConfig) -> TimberResult<Self> {
        let wal = Arc::new(FileWalStore::open(FileWalStoreConfig::from_config(&config)).await?);
        let catalog_path = PathBuf::from(&config.storage.path)
            .join(format!("{}.catalog.json", config.storage.namespace));
        let catalog = Arc::new(FileCatalog::open(catalog_path)?);
        Self::with_stores(config, wal, catalog)
    }

    /// Assembles an engine over injected stores (used by tests and
    /// embedders that bring their own storage).
    ///
    /// # Errors
    ///
    /// Returns `Internal` when metric registration fails.
    pub fn with_stores(
        config: TimberConfig,
        wal: Arc<dyn WalStore>,
        catalog: Arc<dyn Catalog>,
    ) -> TimberResult<Self> {
        let metrics = Metrics::new()?;
        let cache = StateCache::new(&config.cache);
        let materializer = Materializer::new(Arc::clone(&wal), Arc::clone(&catalog), cache.clone());
        let interceptor = WriteInterceptor::new(Arc::clone(&wal), Arc::clone(&catalog), cache);

        Ok(Self {
            config,
            wal,
            catalog,
            metrics,
            cancel: CancellationToken::new(),
            materializer,
            interceptor,
        })
    }

    /// The engine's metrics handle.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Evaluates engine health against the configured alert thresholds.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        HealthMonitor::new(
            self.metrics.clone(),
            self.config.monitoring.alert_thresholds.clone(),
        )
        .check()
    }

    /// A retention sweeper bound to this engine's catalog.
    #[must_use]
    pub fn retention_sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(
            Arc::clone(&self.catalog),
            self.config.retention.branch_retention(),
        )
    }

    /// Runs one retention sweep (see [`RetentionSweeper::sweep`]).
    ///
    /// # Errors
    ///
    /// Propagates catalog failures.
    pub async fn sweep_retention(&self, dry_run: bool) -> TimberResult<SweepReport> {
        self.ensure_ready()?;
        self.retention_sweeper().sweep(dry_run).await
    }

    /// Signals cancellation to all in-flight and future operations.
    pub fn shutdown(&self) {
        info!("engine shutdown requested");
        self.cancel.cancel();
    }

    /// The engine's cancellation token, for wiring into background tasks.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn ensure_ready(&self) -> TimberResult<()> {
        if !self.config.enabled {
            return Err(TimberError::validation(
                "the engine is disabled by configuration",
            ));
        }
        if self.cancel.is_cancelled() {
            return Err(TimberError::Canceled);
        }
        Ok(())
    }

    pub(crate) async fn timed<T>(
        &self,
        op: OpClass,
        fut: impl Future<Output = TimberResult<T>>,
    ) -> TimberResult<T> {
        let start = Instant::now();
        let result = fut.await;
        self.metrics.record(op, result.is_ok(), start.elapsed());
        result
    }

    pub(crate) async fn refresh_gauges(&self) {
        if let Ok(lsn) = self.wal.current_lsn().await {
            self.metrics.set_current_lsn(lsn.value());
        }
        if let Ok(stats) = self.catalog.stats().await {
            self.metrics.set_active_projects(stats.projects as i64);
            self.metrics.set_active_branches(stats.active_branches as i64);
        }
    }

    // ----- projects -------------------------------------------------------

    /// Creates a project with its `main` branch in one logical act: the
    /// CREATE_BRANCH record is appended first and its LSN becomes `main`'s
    /// base, head, and created LSN.
    ///
    /// # Errors
    ///
    /// `Conflict` when the name is taken; `Validation` on an empty name.
    pub async fn create_project(&self, name: &str) -> TimberResult<ProjectDescriptor> {
        self.ensure_ready()?;
        let result = self
            .timed(OpClass::BranchCreate, self.create_project_inner(name))
            .await;
        self.refresh_gauges().await;
        result
    }

    async fn create_project_inner(&self, name: &str) -> TimberResult<ProjectDescriptor> {
        if name.is_empty() {
            return Err(TimberError::validation("project name is required"));
        }
        if self.catalog.get_project(name).await.is_ok() {
            return Err(TimberError::conflict(format!(
                "project `{name}` already exists"
            )));
        }

        let mut main =
            BranchDescriptor::new(ProjectId::new(), MAIN_BRANCH, None, Lsn::ZERO, Lsn::ZERO);
        let project = ProjectDescriptor::new(name, main.id);
        main.project_id = project.id;

        let record = NewRecord::new(
            project.id,
            main.id,
            Operation::CreateBranch,
            "",
            "",
            &RecordPayload::None,
        )?;
        let created_lsn = self.wal.append(record).await?;
        main.base_lsn = created_lsn;
        main.head_lsn = created_lsn;
        main.created_lsn = created_lsn;

        self.catalog.insert_project(project.clone()).await?;
        self.catalog.insert_branch(main).await?;

        info!(project = name, %created_lsn, "created project");
        Ok(project)
    }

    /// Fetches a project by name.
    ///
    /// # Errors
    ///
    /// `NotFound` when no such project exists.
    pub async fn get_project(&self, name: &str) -> TimberResult<ProjectDescriptor> {
        self.ensure_ready()?;
        self.catalog.get_project(name).await
    }

    /// All projects ordered by creation time.
    pub async fn list_projects(&self) -> TimberResult<Vec<ProjectDescriptor>> {
        self.ensure_ready()?;
        self.catalog.list_projects().await
    }

    /// Deletes a project and every branch it owns. Log records referenced
    /// only by this project become unreachable and eligible for GC.
    ///
    /// # Errors
    ///
    /// `NotFound` when no such project exists.
    pub async fn delete_project(&self, name: &str) -> TimberResult<()> {
        self.ensure_ready()?;
        let project = self.catalog.get_project(name).await?;
        for branch in self.catalog.list_branches(project.id, true).await? {
            self.materializer.invalidate_branch(branch.id).await;
        }
        self.catalog.delete_project(project.id).await?;
        self.refresh_gauges().await;
        info!(project = name, "deleted project");
        Ok(())
    }

    // ----- branches -------------------------------------------------------

    /// Forks `new_name` off `source` at `fork_lsn` (defaulting to the
    /// source head). The new branch inherits the source's view up to the
    /// fork point and then diverges.
    ///
    /// # Errors
    ///
    /// - `Conflict` on a duplicate ACTIVE name or inactive source.
    /// - `OutOfRange` when the fork point is outside the source's range.
    pub async fn create_branch(
        &self,
        project_name: &str,
        new_name: &str,
        source: &str,
        fork_lsn: Option<Lsn>,
    ) -> TimberResult<BranchDescriptor> {
        self.ensure_ready()?;
        let result = self
            .timed(
                OpClass::BranchCreate,
                self.create_branch_inner(project_name, new_name, source, fork_lsn),
            )
            .await;
        self.refresh_gauges().await;
        result
    }

    async fn create_branch_inner(
        &self,
        project_name: &str,
        new_name: &str,
        source: &str,
        fork_lsn: Option<Lsn>,
    ) -> TimberResult<BranchDescriptor> {
        if new_name.is_empty() {
            return Err(TimberError::validation("branch name is required"));
        }
        let (project, source_branch) = self.resolve_branch(project_name, source).await?;
        if !source_branch.is_active() {
            return Err(TimberError::conflict(format!(
                "source branch `{source}` is not active"
            )));
        }

        let fork_lsn = fork_lsn.unwrap_or(source_branch.head_lsn);
        if !source_branch.contains_lsn(fork_lsn) {
            return Err(TimberError::out_of_range(format!(
                "fork LSN {} outside source range [{}, {}]",
                fork_lsn, source_branch.base_lsn, source_branch.head_lsn
            )));
        }
        if let Ok(existing) = self.catalog.get_branch(project.id, new_name).await {
            if existing.is_active() {
                return Err(TimberError::conflict(format!(
                    "branch `{new_name}` already exists in project"
                )));
            }
        }

        let mut branch = BranchDescriptor::new(
            project.id,
            new_name,
            Some(source_branch.id),
            fork_lsn,
            Lsn::ZERO,
        );
        let record = NewRecord::new(
            project.id,
            branch.id,
            Operation::CreateBranch,
            "",
            "",
            &RecordPayload::None,
        )?;
        branch.created_lsn = self.wal.append(record).await?;
        self.catalog.insert_branch(branch.clone()).await?;

        info!(
            project = project_name,
            branch = new_name,
            source,
            %fork_lsn,
            "created branch"
        );
        Ok(branch)
    }

    /// Soft-deletes a branch: it enters PENDING_DELETE and stays
    /// recoverable until the retention window elapses.
    ///
    /// # Errors
    ///
    /// `Conflict` for `main` or branches with ACTIVE children.
    pub async fn delete_branch(
        &self,
        project_name: &str,
        branch_name: &str,
    ) -> TimberResult<BranchDescriptor> {
        self.ensure_ready()?;
        let (project, branch) = self.resolve_branch(project_name, branch_name).await?;
        let deleted = self.catalog.mark_pending_delete(branch.id).await?;

        let record = NewRecord::new(
            project.id,
            branch.id,
            Operation::DropBranch,
            "",
            "",
            &RecordPayload::None,
        )?;
        self.wal.append(record).await?;

        self.materializer.invalidate_branch(branch.id).await;
        self.refresh_gauges().await;
        info!(project = project_name, branch = branch_name, "soft-deleted branch");
        Ok(deleted)
    }

    /// Recovers a PENDING_DELETE branch back to ACTIVE.
    ///
    /// # Errors
    ///
    /// `Conflict` when the branch is not pending deletion or its name was
    /// reclaimed.
    pub async fn recover_branch(
        &self,
        project_name: &str,
        branch_name: &str,
    ) -> TimberResult<BranchDescriptor> {
        self.ensure_ready()?;
        let (_, branch) = self.resolve_branch(project_name, branch_name).await?;
        let recovered = self.catalog.recover_branch(branch.id).await?;
        self.refresh_gauges().await;
        Ok(recovered)
    }

    /// Branches of a project ordered by creation time.
    pub async fn list_branches(
        &self,
        project_name: &str,
        include_deleted: bool,
    ) -> TimberResult<Vec<BranchDescriptor>> {
        self.ensure_ready()?;
        let project = self.catalog.get_project(project_name).await?;
        self.catalog.list_branches(project.id, include_deleted).await
    }

    /// Fetches one branch by name.
    pub async fn get_branch(
        &self,
        project_name: &str,
        branch_name: &str,
    ) -> TimberResult<BranchDescriptor> {
        self.ensure_ready()?;
        Ok(self.resolve_branch(project_name, branch_name).await?.1)
    }

    /// Builds a head-pinned context for the named branch.
    pub async fn branch_ctx(
        &self,
        project_name: &str,
        branch_name: &str,
    ) -> TimberResult<BranchContext> {
        let (project, branch) = self.resolve_branch(project_name, branch_name).await?;
        Ok(BranchContext::new(project.id, branch.id))
    }

    pub(crate) async fn resolve_branch(
        &self,
        project_name: &str,
        branch_name: &str,
    ) -> TimberResult<(ProjectDescriptor, BranchDescriptor)> {
        let project = self.catalog.get_project(project_name).await?;
        let branch = self.catalog.get_branch(project.id, branch_name).await?;
        Ok((project, branch))
    }

    pub(crate) async fn resolve_writable_branch(
        &self,
        ctx: &BranchContext,
    ) -> TimberResult<BranchDescriptor> {
        if ctx.is_pinned() {
            return Err(TimberError::validation(
                "cannot write through a context pinned to a historical position",
            ));
        }
        let branch = self.catalog.get_branch_by_id(ctx.branch_id).await?;
        if branch.project_id != ctx.project_id {
            return Err(TimberError::validation(
                "context branch does not belong to the context project",
            ));
        }
        if !branch.is_active() {
            return Err(TimberError::conflict(format!(
                "branch `{}` is not active",
                branch.name
            )));
        }
        Ok(branch)
    }

    pub(crate) async fn resolve_readable_branch(
        &self,
        ctx: &BranchContext,
    ) -> TimberResult<BranchDescriptor> {
        let branch = self.catalog.get_branch_by_id(ctx.branch_id).await?;
        if branch.project_id != ctx.project_id {
            return Err(TimberError::validation(
                "context branch does not belong to the context project",
            ));
        }
        Ok(branch)
    }

    // ----- writes ---------------------------------------------------------

    /// Inserts one document (see [`WriteInterceptor::insert_one`]).
    pub async fn insert_one(
        &self,
        ctx: &BranchContext,
        collection: &str,
        document: Document,
    ) -> TimberResult<InsertOneResult> {
        self.ensure_ready()?;
        let branch = self.resolve_writable_branch(ctx).await?;
        let result = self
            .timed(
                OpClass::Append,
                self.interceptor.insert_one(&branch, collection, document),
            )
            .await;
        self.refresh_gauges().await;
        result
    }

    /// Inserts a batch of documents (see [`WriteInterceptor::insert_many`]).
    pub async fn insert_many(
        &self,
        ctx: &BranchContext,
        collection: &str,
        documents: Vec<Document>,
    ) -> TimberResult<InsertManyResult> {
        self.ensure_ready()?;
        let branch = self.resolve_writable_branch(ctx).await?;
        let result = self
            .timed(
                OpClass::Append,
                self.interceptor.insert_many(&branch, collection, documents),
            )
            .await;
        self.refresh_gauges().await;
        result
    }

    /// Records an update (see [`WriteInterceptor::update_one`]).
    pub async fn update_one(
        &self,
        ctx: &BranchContext,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> TimberResult<UpdateResult> {
        self.ensure_ready()?;
        let branch = self.resolve_writable_branch(ctx).await?;
        let result = self
            .timed(
                OpClass::Append,
                self.interceptor.update_one(&branch, collection, filter, update),
            )
            .await;
        self.refresh_gauges().await;
        result
    }

    /// Records a delete (see [`WriteInterceptor::delete_one`]).
    pub async fn delete_one(
        &self,
        ctx: &BranchContext,
        collection: &str,
        filter: Document,
    ) -> TimberResult<DeleteResult> {
        self.ensure_ready()?;
        let branch = self.resolve_writable_branch(ctx).await?;
        let result = self
            .timed(
                OpClass::Append,
                self.interceptor.delete_one(&branch, collection, filter),
            )
            .await;
        self.refresh_gauges().await;
        result
    }

    /// Records a collection-creation marker.
    pub async fn create_collection(
        &self,
        ctx: &BranchContext,
        collection: &str,
    ) -> TimberResult<Lsn> {
        self.ensure_ready()?;
        let branch = self.resolve_writable_branch(ctx).await?;
        let result = self
            .timed(
                OpClass::Append,
                self.interceptor.create_collection(&branch, collection),
            )
            .await;
        self.refresh_gauges().await;
        result
    }

    /// The largest committed LSN in the WAL.
    pub async fn current_lsn(&self) -> TimberResult<Lsn> {
        self.ensure_ready()?;
        self.wal.current_lsn().await
    }

    pub(crate) fn wal(&self) -> &Arc<dyn WalStore> {
        &self.wal
    }

    pub(crate) fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }
}
