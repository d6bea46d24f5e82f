//! LSN allocation.
//!
//! A single atomic counter hands out strictly increasing LSNs. The counter
//! is seeded from the recovery scan's high-water mark, so the sequence
//! survives restarts. An allocation whose append later fails is burned: the
//! sequence keeps a gap of one and the value is never reused.

use std::sync::atomic::{AtomicI64, Ordering};

use timberdb_core::Lsn;

/// Monotonic LSN source shared by all appenders of one store.
#[derive(Debug)]
pub struct LsnAllocator {
    last: AtomicI64,
}

impl LsnAllocator {
    /// Creates an allocator whose next value is `last.next()`.
    #[must_use]
    pub fn new(last: Lsn) -> Self {
        Self {
            last: AtomicI64::new(last.value()),
        }
    }

    /// Returns the next LSN. Concurrent callers receive distinct values.
    #[must_use]
    pub fn allocate(&self) -> Lsn {
        Lsn::new(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recently allocated LSN (`Lsn::ZERO` before any allocation).
    #[must_use]
    pub fn last_allocated(&self) -> Lsn {
        Lsn::new(self.last.load(Ordering::SeqCst))
    }
}
