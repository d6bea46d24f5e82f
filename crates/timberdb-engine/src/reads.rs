//! Read facade.
//!
//! `find`/`find_one`/`count` evaluate a filter against the materialized
//! state of the context's branch, at its pinned LSN or time when set and at
//! the branch head otherwise. Results come back in document-id order.

use std::sync::Arc;

use timberdb_core::{Document, OpClass, TimberResult};

use crate::cache::CollectionState;
use crate::engine::{BranchContext, Engine};
use crate::filter::Filter;

impl Engine {
    /// All documents in `collection` matching `filter`, in id order.
    ///
    /// # Errors
    ///
    /// `Validation` on a malformed filter; `OutOfRange` when the context
    /// pin lies outside the branch's range.
    pub async fn find(
        &self,
        ctx: &BranchContext,
        collection: &str,
        filter: &Document,
    ) -> TimberResult<Vec<Document>> {
        self.ensure_ready()?;
        self.timed(OpClass::Query, async {
            let parsed = Filter::parse(filter)?;
            let state = self.pinned_state(ctx, collection).await?;
            Ok(state
                .values()
                .filter(|doc| parsed.matches(doc))
                .cloned()
                .collect())
        })
        .await
    }

    /// The first matching document in id order, if any.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::find`].
    pub async fn find_one(
        &self,
        ctx: &BranchContext,
        collection: &str,
        filter: &Document,
    ) -> TimberResult<Option<Document>> {
        self.ensure_ready()?;
        self.timed(OpClass::Query, async {
            let parsed = Filter::parse(filter)?;
            let state = self.pinned_state(ctx, collection).await?;
            Ok(state.values().find(|doc| parsed.matches(doc)).cloned())
        })
        .await
    }

    /// Number of matching documents.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::find`].
    pub async fn count(
        &self,
        ctx: &BranchContext,
        collection: &str,
        filter: &Document,
    ) -> TimberResult<u64> {
        self.ensure_ready()?;
        self.timed(OpClass::Query, async {
            let parsed = Filter::parse(filter)?;
            let state = self.pinned_state(ctx, collection).await?;
            Ok(state.values().filter(|doc| parsed.matches(doc)).count() as u64)
        })
        .await
    }

    async fn pinned_state(
        &self,
        ctx: &BranchContext,
        collection: &str,
    ) -> TimberResult<Arc<CollectionState>> {
        let branch = self.resolve_readable_branch(ctx).await?;
        let lsn = match (ctx.as_of_lsn, ctx.as_of_time) {
            (Some(lsn), _) => lsn,
            (None, Some(at)) => self.materializer.resolve_time(&branch, at).await?,
            (None, None) => branch.head_lsn,
        };
        self.materializer
            .materialize_at_lsn(&branch, collection, lsn)
            .await
    }
}
