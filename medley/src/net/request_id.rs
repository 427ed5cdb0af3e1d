//! Request correlation ids.
//!
//! Every asynchronous server operation is tagged with a `RequestId` when
//! it is invoked. The caller keeps the id and correlates result events
//! against it. Ids are drawn from a process-wide counter and are unique
//! within a process run.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Process-wide counter backing [`RequestId::next_valid`].
static NEXT_REQUEST_ID: AtomicU32 = AtomicU32::new(0);

/// Opaque correlation token for asynchronous server operations.
///
/// The zero value is reserved as the invalid sentinel. Valid ids are
/// never reused within a process run (modulo u32 wrap-around, where the
/// zero value is skipped).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u32);

impl RequestId {
    /// The invalid sentinel id.
    pub const INVALID: RequestId = RequestId(0);

    /// Draws the next valid id from the process-wide counter.
    ///
    /// Never returns the invalid (zero) id, even after wrap-around.
    pub fn next_valid() -> Self {
        loop {
            let value = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if value != 0 {
                return RequestId(value);
            }
        }
    }

    /// Returns true for any id other than the invalid sentinel.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Returns the raw numeric value.
    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
