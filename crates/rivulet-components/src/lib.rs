#![forbid(unsafe_code)]
//! rivulet-components: ports, the component contract and the stream
//! algorithms.
//!
//! Design intent:
//! - Every component runs synchronously on its own thread; ports are the only
//!   thing components share.
//! - Sorted-input algorithms (merge join, intersection, dedup, sorted
//!   aggregate, merge) check order as they read and fail fatally on disorder.
//! - Big buffers (sort runs, slave key groups) go through `rivulet-mem` so
//!   they are budgeted and can spill.

pub mod attrs;
pub mod cancel;
pub mod context;
pub mod error;
pub mod port;
pub mod traits;
pub mod transform;

mod sorted;

pub mod aggregate;
pub mod collect;
pub mod copy;
pub mod dedup;
pub mod filter;
pub mod generator;
pub mod join;
pub mod merge;
pub mod partition;
pub mod reformat;
pub mod sort;
pub mod trash;

pub use attrs::Attrs;
pub use cancel::CancellationToken;
pub use context::{GraphContext, LookupTable};
pub use error::{ComponentError, Result, ResultCode};
pub use port::{edge, read_any, EdgeCounts, EdgeEnv, EdgeStats, InputPort, OutputPort, Ports};
pub use traits::{Component, InitContext, RunContext};
pub use transform::{
    filter_fn, generate_fn, transform_fn, CopyByName, RecordFilter, RecordGenerate, RecordTransform,
    TransformError, TransformInit, TransformOutcome,
};

pub use aggregate::{AggFunction, AggSpec, Aggregate};
pub use collect::{Collect, CollectHandle};
pub use copy::SimpleCopy;
pub use dedup::{Dedup, Keep};
pub use filter::{ExtFilter, Predicate};
pub use generator::{Generator, RecordList};
pub use join::{DataIntersection, HashJoin, JoinKeys, JoinType, MergeJoin};
pub use merge::Merge;
pub use partition::{HashPartition, Partition, PartitionFunction, RangePartition, RoundRobin};
pub use reformat::Reformat;
pub use sort::{ExternalSorter, Sort};
pub use trash::Trash;
