//! Peak memory and spill accounting for one graph run.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct PeakTracker {
    peak_bytes: AtomicUsize,
    spilled_bytes: AtomicU64,
    spill_events: AtomicU64,
}

/// Point-in-time copy of a `PeakTracker`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemStats {
    pub peak_bytes: usize,
    pub spilled_bytes: u64,
    pub spill_events: u64,
}

impl PeakTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new "used bytes" value; updates peak if higher.
    pub fn record_used(&self, used_bytes: usize) {
        let prev = self.peak_bytes.fetch_max(used_bytes, Ordering::AcqRel);
        #[cfg(feature = "tracing")]
        if used_bytes > prev {
            tracing::trace!(used_bytes, "new memory peak");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = prev;
    }

    /// Count bytes written to spill storage.
    pub fn record_spill(&self, bytes: u64) {
        self.spilled_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.spill_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peak(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MemStats {
        MemStats {
            peak_bytes: self.peak_bytes.load(Ordering::Relaxed),
            spilled_bytes: self.spilled_bytes.load(Ordering::Relaxed),
            spill_events: self.spill_events.load(Ordering::Relaxed),
        }
    }
}
