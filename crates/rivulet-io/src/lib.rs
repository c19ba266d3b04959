#![forbid(unsafe_code)]
//! rivulet-io: `Storage` backends for spill segments.
//!
//! - `FsStorage` writes segments as plain files under the spill directory.
//! - `MemoryStorage` keeps them in a map; selected with a `memory://` spill dir.

pub mod storage;

pub use storage::{build_storage, FsStorage, MemoryStorage, MEMORY_SCHEME};
