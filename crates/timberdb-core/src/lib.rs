//! Core domain types for TimberDB: LSNs, documents, WAL records, branch and
//! project metadata, errors, configuration, and metrics.

pub mod branch;
pub mod config;
pub mod error;
pub mod ids;
pub mod lsn;
pub mod metrics;
pub mod project;
pub mod record;
pub mod value;

pub use branch::{BranchDescriptor, BranchStatus, MAIN_BRANCH};
pub use config::{
    AlertThresholds, CacheConfig, CompressionConfig, MonitoringConfig, RetentionConfig,
    StorageConfig, TimberConfig,
};
pub use error::{TimberError, TimberResult};
pub use ids::{BranchId, ProjectId};
pub use lsn::Lsn;
pub use metrics::{Metrics, MetricsSnapshot, OpClass, OpStats};
pub use project::ProjectDescriptor;
pub use record::{NewRecord, Operation, RecordPayload, WalRecord, META_IS_FILTER};
pub use value::{Document, Value};
