//! Timestamp source for cache validation.
//!
//! Every element mutation stamps the element from its container's clock; a
//! cache slot is only valid while its stored timestamp equals the element's
//! current one. The clock is injected at container construction so tests can
//! substitute a deterministic counter.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic creation-or-mutation instant of an element.
pub type Timestamp = u64;

pub trait Clock: fmt::Debug {
    /// Returns the next instant. Two calls never return the same value on
    /// the same clock.
    fn now(&self) -> Timestamp;
}

/// Process-wide monotonic counter, the default clock of every container.
///
/// All instances share one counter, so timestamps are unique across
/// containers as well. That keeps identifiers unambiguous when a cache is
/// shared between containers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

static NEXT_INSTANT: AtomicU64 = AtomicU64::new(1);

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        NEXT_INSTANT.fetch_add(1, Ordering::Relaxed)
    }
}

pub(crate) fn default_clock() -> Arc<dyn Clock> {
    Arc::new(MonotonicClock)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn monotonic_clock_strictly_increases() {
        let clock = MonotonicClock;
        let a = clock.now();
        let b = clock.now();
        let c = clock.now();
        assert!(a < b && b < c);
    }

    #[test]
    fn instances_share_the_counter() {
        let a = MonotonicClock.now();
        let b = MonotonicClock.now();
        assert!(b > a);
    }
}
