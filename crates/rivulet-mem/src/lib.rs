#![forbid(unsafe_code)]
//! rivulet-mem: memory budgeting and the disk-backed state of components.
//!
//! - `guard`: the concrete `MemoryBudget` with RAII guards.
//! - `tracking`: peak usage and spill counters for a graph run.
//! - `spill`: checksummed spill segments, sorted runs built from them, and the
//!   per-key-group `RecordBuffer`.
//!
//! Storage backends implement `spill::Storage` and live in `rivulet-io`.

pub mod error;
pub mod guard;
pub mod spill;
pub mod tracking;

pub use guard::{BudgetGuardImpl, MemoryBudgetImpl};
pub use spill::{Codec, RecordBuffer, RunMeta, RunReader, RunWriter, SpillManager, Storage};
pub use tracking::{MemStats, PeakTracker};
