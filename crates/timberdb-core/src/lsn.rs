use std::fmt;

use serde::{Deserialize, Serialize};

/// Log Sequence Number - a position in the write-ahead log.
///
/// LSNs are signed 64-bit, strictly increasing, and never reused. Zero is
/// reserved for "before any record"; the first allocated LSN is 1.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Lsn(i64);

impl Lsn {
    /// Reserved value meaning "before any record".
    pub const ZERO: Self = Self(0);

    /// The first LSN ever assigned.
    pub const FIRST: Self = Self(1);

    /// Creates an LSN from a raw value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Returns the next LSN.
    ///
    /// # Panics
    ///
    /// Panics on `i64::MAX` overflow, which would violate ordering guarantees
    /// long before any realistic workload reaches it.
    #[must_use]
    pub fn next(&self) -> Self {
        Self(self.0.checked_add(1).expect("LSN overflow"))
    }

    /// Returns the previous LSN, saturating at zero.
    #[must_use]
    pub fn prev(&self) -> Self {
        Self(self.0.saturating_sub(1).max(0))
    }

    /// `true` when this LSN refers to an actual record position.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Lsn {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Lsn> for i64 {
    fn from(lsn: Lsn) -> Self {
        lsn.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsn_ordering() {
        let a = Lsn::new(1);
        let b = Lsn::new(2);
        assert!(a < b);
        assert_eq!(a.next(), b);
        assert_eq!(b.prev(), a);
    }

    #[test]
    fn test_lsn_zero_reserved() {
        assert!(!Lsn::ZERO.is_valid());
        assert!(Lsn::FIRST.is_valid());
        assert_eq!(Lsn::ZERO.next(), Lsn::FIRST);
        assert_eq!(Lsn::ZERO.prev(), Lsn::ZERO);
    }
}
