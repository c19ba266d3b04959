//! `MemoryBudget` implementation with RAII guards.
//!
//! One budget is shared by every component of a graph. Sorters grow a single
//! guard as they buffer records and shrink it to zero after spilling a run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rivulet_core::budget::{BudgetGuard, MemoryBudget};

use crate::error::{Error, Result};
use crate::tracking::PeakTracker;

struct BudgetInner {
    capacity: usize,
    used: AtomicUsize,
    tracker: Option<Arc<PeakTracker>>,
}

impl BudgetInner {
    fn reserve(&self, bytes: usize) -> bool {
        let mut cur = self.used.load(Ordering::Relaxed);
        loop {
            let next = match cur.checked_add(bytes) {
                Some(n) if n <= self.capacity => n,
                _ => return false,
            };
            match self
                .used
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    if let Some(t) = &self.tracker {
                        t.record_used(next);
                    }
                    return true;
                }
                Err(observed) => cur = observed,
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Shared memory cap. Cloning yields another handle on the same budget.
#[derive(Clone)]
pub struct MemoryBudgetImpl {
    inner: Arc<BudgetInner>,
}

impl MemoryBudgetImpl {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                capacity: capacity_bytes,
                used: AtomicUsize::new(0),
                tracker: None,
            }),
        }
    }

    /// A budget that reports every new high-water mark to `tracker`.
    pub fn with_tracker(capacity_bytes: usize, tracker: Arc<PeakTracker>) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                capacity: capacity_bytes,
                used: AtomicUsize::new(0),
                tracker: Some(tracker),
            }),
        }
    }

    /// Like `try_acquire`, but reports exhaustion as an error.
    pub fn acquire(&self, bytes: usize, tag: &'static str) -> Result<BudgetGuardImpl> {
        self.try_acquire(bytes, tag).ok_or(Error::BudgetExceeded {
            tag,
            requested: bytes,
            capacity: self.inner.capacity,
            used: self.inner.used.load(Ordering::Relaxed),
        })
    }

    /// An empty guard to be grown later.
    pub fn empty_guard(&self, tag: &'static str) -> BudgetGuardImpl {
        BudgetGuardImpl {
            inner: Arc::clone(&self.inner),
            bytes: 0,
            tag,
        }
    }
}

impl MemoryBudget for MemoryBudgetImpl {
    type Guard = BudgetGuardImpl;

    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard> {
        if bytes > 0 && !self.inner.reserve(bytes) {
            return None;
        }
        Some(BudgetGuardImpl {
            inner: Arc::clone(&self.inner),
            bytes,
            tag,
        })
    }

    fn capacity_bytes(&self) -> usize {
        self.inner.capacity
    }

    fn used_bytes(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }
}

/// Bytes held against a `MemoryBudgetImpl`; returned on drop.
pub struct BudgetGuardImpl {
    inner: Arc<BudgetInner>,
    bytes: usize,
    tag: &'static str,
}

impl BudgetGuardImpl {
    /// Grow by `additional` bytes. On failure the guard is unchanged.
    pub fn try_grow(&mut self, additional: usize) -> bool {
        if additional == 0 || self.inner.reserve(additional) {
            self.bytes += additional;
            true
        } else {
            false
        }
    }

    /// Resize to exactly `new_bytes`. Shrinking always succeeds.
    pub fn try_resize(&mut self, new_bytes: usize) -> bool {
        if new_bytes <= self.bytes {
            self.inner.release(self.bytes - new_bytes);
            self.bytes = new_bytes;
            true
        } else {
            self.try_grow(new_bytes - self.bytes)
        }
    }

    /// Return everything to the budget but keep the guard for reuse.
    pub fn release_all(&mut self) {
        self.try_resize(0);
    }
}

impl BudgetGuard for BudgetGuardImpl {
    fn bytes(&self) -> usize {
        self.bytes
    }

    fn tag(&self) -> &'static str {
        self.tag
    }
}

impl Drop for BudgetGuardImpl {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.inner.release(self.bytes);
            self.bytes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_grows_and_shrinks_within_capacity() {
        let budget = MemoryBudgetImpl::new(100);
        let mut g = budget.empty_guard("sort");
        assert!(g.try_grow(60));
        assert!(!g.try_grow(50), "would exceed capacity");
        assert_eq!(g.bytes(), 60);
        assert_eq!(budget.used_bytes(), 60);

        assert!(g.try_resize(10));
        assert_eq!(budget.used_bytes(), 10);
        g.release_all();
        assert_eq!(budget.used_bytes(), 0);
    }

    #[test]
    fn acquire_reports_exhaustion() {
        let budget = MemoryBudgetImpl::new(10);
        let _held = budget.acquire(8, "a").expect("fits");
        let err = budget.acquire(8, "b").err().expect("second acquire fails");
        assert!(matches!(err, Error::BudgetExceeded { requested: 8, used: 8, .. }));
    }

    #[test]
    fn tracker_sees_peak() {
        let tracker = Arc::new(PeakTracker::new());
        let budget = MemoryBudgetImpl::with_tracker(1000, Arc::clone(&tracker));
        {
            let _a = budget.acquire(300, "a").expect("a");
            let _b = budget.acquire(200, "b").expect("b");
        }
        let _c = budget.acquire(100, "c").expect("c");
        assert_eq!(tracker.peak(), 500);
        assert_eq!(budget.used_bytes(), 100);
    }
}
