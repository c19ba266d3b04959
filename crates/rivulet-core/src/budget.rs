//! Abstract memory budget interfaces.
//!
//! The concrete implementation lives in `rivulet-mem`. Only the traits live
//! here so keys, records and components can name the API without pulling in
//! the spill machinery.

/// Bytes held against a memory budget. Returned to the budget on drop.
pub trait BudgetGuard: Send {
    /// Number of bytes currently accounted for by this guard.
    fn bytes(&self) -> usize;
    /// Debug tag for tracing.
    fn tag(&self) -> &'static str {
        "guard"
    }
}

/// A memory-cap enforcer shared by every component of a graph.
///
/// Sorters and buffers call `try_acquire` before growing. On `None` they must
/// spill what they hold and retry with less.
pub trait MemoryBudget: Send + Sync + 'static {
    type Guard: BudgetGuard;

    /// Attempt to acquire `bytes` from the live budget. Returns a guard on success.
    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard>;

    /// Total configured capacity (bytes).
    fn capacity_bytes(&self) -> usize;

    /// Approximate currently used bytes (advisory).
    fn used_bytes(&self) -> usize;
}
