#![forbid(unsafe_code)]
//! rivulet-exec: graph wiring, phased threaded execution and status
//! aggregation, plus registries and declarative graph definitions.
//!
//! Design intent:
//! - A graph is built, then run once; `Graph::run` consumes it.
//! - Components of one phase run together, one thread each. A phase starts
//!   only after every earlier phase finished `OK`.
//! - Component failures never surface as `Err`: they are reported in the
//!   `GraphResult`, whose code is the worst component code.

pub mod dsl;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod registry;
pub mod telemetry;

pub use dsl::{ComponentSpec, EdgeSpec, GraphSpec};
pub use error::{GraphError, Result};
pub use graph::Graph;
pub use metrics::{ComponentStatus, EdgeReport, GraphResult};
pub use registry::{ComponentRegistry, TransformRegistry};
pub use telemetry::init_tracing;
