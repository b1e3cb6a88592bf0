//! Identifier types for runtime entities.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FUTURE_ID: AtomicU64 = AtomicU64::new(1);

/// A process-unique identifier for a future (and the coroutine wrapping it).
///
/// Used for log correlation and for detaching entries from a
/// [`CoroutineManager`](crate::coroutine::CoroutineManager).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FutureId(u64);

impl FutureId {
    /// Allocates the next identifier.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(NEXT_FUTURE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates an identifier for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FutureId({})", self.0)
    }
}

impl fmt::Display for FutureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = FutureId::next();
        let b = FutureId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn display_and_debug() {
        let id = FutureId::new_for_test(12);
        assert_eq!(id.to_string(), "F12");
        assert_eq!(format!("{id:?}"), "FutureId(12)");
        assert_eq!(id.as_u64(), 12);
    }
}
