#![forbid(unsafe_code)]
//! rivulet-core: the data model shared by every rivulet crate.
//!
//! Records are fixed-schema, mutable value containers that components reuse
//! across iterations. Keys compare records (or records of two different
//! schemas, positionally) and project them into hashable form.
//!
//! Nothing in this crate performs I/O or spawns threads.

pub mod budget;
pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod key;
pub mod prelude;
pub mod record;
pub mod schema;
pub mod value;
