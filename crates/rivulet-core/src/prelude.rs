//! Convenient re-exports for downstream crates.

pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::id::{EdgeId, RunId, SpillId};
pub use crate::key::{HashKey, KeyField, RecordKey, SortOrder};
pub use crate::record::DataRecord;
pub use crate::schema::{DataType, FieldMetadata, RecordMetadata};
pub use crate::value::{Decimal, Value};
