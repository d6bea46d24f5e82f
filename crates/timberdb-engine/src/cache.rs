//! Materialized-state cache.
//!
//! States are keyed by `(branch, collection, lsn)`, so a cached entry is
//! immutable by construction; the per-branch key tracking still lets any
//! write to a branch invalidate everything cached for it, keeping the cache
//! invisible to correctness. Branches never share entries.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use moka::future::Cache as MokaCache;
use parking_lot::Mutex;

use timberdb_core::{BranchId, CacheConfig, Document, Lsn};

/// Materialized view of one collection: document id to document.
pub type CollectionState = BTreeMap<String, Document>;

type CacheKey = (BranchId, String, Lsn);

/// Shared cache of materialized collection states.
#[derive(Clone)]
pub struct StateCache {
    states: MokaCache<CacheKey, Arc<CollectionState>>,
    tracking: Arc<Mutex<HashMap<BranchId, HashSet<CacheKey>>>>,
}

impl StateCache {
    /// Builds a cache from the engine configuration.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            states: MokaCache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(config.query_ttl())
                .build(),
            tracking: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Looks up a cached state.
    pub async fn get(&self, branch_id: BranchId, collection: &str, lsn: Lsn) -> Option<Arc<CollectionState>> {
        self.states
            .get(&(branch_id, collection.to_owned(), lsn))
            .await
    }

    /// Stores a state and registers it for branch-level invalidation.
    pub async fn insert(
        &self,
        branch_id: BranchId,
        collection: &str,
        lsn: Lsn,
        state: Arc<CollectionState>,
    ) {
        let key = (branch_id, collection.to_owned(), lsn);
        self.tracking
            .lock()
            .entry(branch_id)
            .or_default()
            .insert(key.clone());
        self.states.insert(key, state).await;
    }

    /// Drops everything cached for one branch. Called on every write to the
    /// branch; other branches are unaffected.
    pub async fn invalidate_branch(&self, branch_id: BranchId) {
        let keys = self
            .tracking
            .lock()
            .remove(&branch_id)
            .unwrap_or_default();
        for key in keys {
            self.states.invalidate(&key).await;
        }
    }

    /// Number of live entries (approximate, for diagnostics).
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.states.entry_count()
    }
}
