//! Opaque fact handles.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identity of a fact in working memory.
///
/// Handles are issued by the fact store in increasing order and are never reused
/// within a session, so ordering by handle is ordering by insertion. Two facts with
/// equal values but different handles are different facts.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FactId(u64);

impl FactId {
    /// Creates a fact handle from its raw index.
    #[must_use]
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    /// Returns a sentinel value representing "no fact".
    ///
    /// This uses `u64::MAX` as the index, which is never issued.
    #[must_use]
    pub const fn null() -> Self {
        Self(u64::MAX)
    }

    /// Returns true if this is the null sentinel value.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }

    /// Returns the raw index of this handle.
    #[must_use]
    pub const fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "FactId(null)")
        } else {
            write!(f, "FactId({})", self.0)
        }
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "#null")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}
