//! TimberDB engine: Git-like branching and point-in-time query over a
//! document store backed by an append-only WAL.
//!
//! The [`Engine`] is the front door. A write flows through the
//! [`interceptor::WriteInterceptor`] (identity extraction, payload
//! serialization, append, head advance); a read resolves the branch's log
//! range and replays it through the [`materializer::Materializer`];
//! restores move heads backward or fork branches at historical positions
//! with validation and previews.
//!
//! ```no_run
//! use timberdb_core::{Document, TimberConfig};
//! use timberdb_engine::Engine;
//!
//! # async fn demo() -> timberdb_core::TimberResult<()> {
//! let engine = Engine::open(TimberConfig::default()).await?;
//! engine.create_project("demo").await?;
//! let ctx = engine.branch_ctx("demo", "main").await?;
//!
//! let doc = Document::from_json(serde_json::json!({"_id": "u1", "name": "Alice"}))?;
//! engine.insert_one(&ctx, "users", doc).await?;
//!
//! let state = engine
//!     .materialize_at_lsn("demo", "main", "users", engine.current_lsn().await?)
//!     .await?;
//! assert!(state.contains_key("u1"));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod engine;
pub mod filter;
pub mod interceptor;
pub mod materializer;
pub mod monitor;
pub mod reads;
pub mod retention;
pub mod timetravel;
pub mod update;

pub use cache::{CollectionState, StateCache};
pub use engine::{BranchContext, Engine};
pub use filter::Filter;
pub use interceptor::{
    DeleteResult, InsertManyResult, InsertOneResult, UpdateResult, WriteInterceptor,
};
pub use materializer::{ChainSegment, Materializer};
pub use monitor::{HealthMonitor, HealthReport};
pub use retention::{RetentionSweeper, SweepReport};
pub use timetravel::{RestorePreview, TimeTravelInfo};
pub use update::UpdateSpec;
