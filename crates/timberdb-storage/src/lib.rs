//! TimberDB storage layer: the append-only WAL store with payload
//! compression, the LSN allocator, and the branch/project catalog.
//!
//! The WAL store exclusively owns record bytes; the catalog holds only LSN
//! coordinates into the log. Both are exposed as traits so the engine layer
//! can run over the durable file implementations or the in-memory ones.

pub mod allocator;
pub mod catalog;
pub mod compression;
pub mod wal;

pub use allocator::LsnAllocator;
pub use catalog::{Catalog, CatalogStats, FileCatalog};
pub use compression::{CompressionAlgorithm, PayloadCodec};
pub use wal::{FileWalStore, FileWalStoreConfig, MemoryWalStore, WalStore};
