//! The component contract.
//!
//! The graph calls `init` once on the building thread, then `run` on the
//! component's own thread. After `run` returns, the graph applies the EOF
//! policy for the outcome: EOF on every output for `Ok` and recoverable
//! errors, nothing for fatal errors unless configured.

use std::sync::Arc;

use rivulet_core::schema::RecordMetadata;

use crate::cancel::CancellationToken;
use crate::context::GraphContext;
use crate::error::{ComponentError, Result};
use crate::port::Ports;

pub trait Component: Send {
    /// Stable type tag, e.g. `"MERGE_JOIN"`.
    fn type_tag(&self) -> &'static str;

    /// Validate port arity and schemas, build keys and allocate records.
    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()>;

    /// The processing loop.
    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()>;
}

/// What a component sees at `init`: its id, the graph context and the
/// metadata on each connected port (`None` for gaps).
pub struct InitContext<'a> {
    pub id: &'a str,
    pub graph: &'a GraphContext,
    pub inputs: &'a [Option<Arc<RecordMetadata>>],
    pub outputs: &'a [Option<Arc<RecordMetadata>>],
}

impl<'a> InitContext<'a> {
    pub fn input_count(&self) -> usize {
        self.inputs.iter().flatten().count()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.iter().flatten().count()
    }

    pub fn has_output(&self, index: usize) -> bool {
        matches!(self.outputs.get(index), Some(Some(_)))
    }

    pub fn input(&self, index: usize) -> Result<&'a Arc<RecordMetadata>> {
        self.inputs
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| ComponentError::config(format!("input port {index} is not connected")))
    }

    pub fn output(&self, index: usize) -> Result<&'a Arc<RecordMetadata>> {
        self.outputs
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| ComponentError::config(format!("output port {index} is not connected")))
    }

    /// Require between `min` and `max` connected inputs with no gaps.
    pub fn require_inputs(&self, min: usize, max: Option<usize>) -> Result<()> {
        check_arity("input", self.inputs, min, max)
    }

    pub fn require_outputs(&self, min: usize, max: Option<usize>) -> Result<()> {
        check_arity("output", self.outputs, min, max)
    }

    /// Every connected output must carry records compatible with `meta`.
    pub fn require_outputs_compatible(&self, meta: &RecordMetadata) -> Result<()> {
        for out in self.outputs.iter().flatten() {
            meta.check_compatible(out).map_err(ComponentError::config)?;
        }
        Ok(())
    }
}

fn check_arity(
    kind: &str,
    ports: &[Option<Arc<RecordMetadata>>],
    min: usize,
    max: Option<usize>,
) -> Result<()> {
    let connected = ports.iter().flatten().count();
    if connected < min {
        return Err(ComponentError::Config(match min {
            1 => format!("at least one {kind} port required"),
            n => format!("at least {n} {kind} ports required, {connected} connected"),
        }));
    }
    if let Some(max) = max {
        if connected > max {
            return Err(ComponentError::Config(match max {
                0 => format!("no {kind} ports allowed"),
                n => format!("at most {n} {kind} ports allowed, {connected} connected"),
            }));
        }
    }
    if let Some(gap) = ports.iter().take(min).position(Option::is_none) {
        return Err(ComponentError::config(format!("{kind} port {gap} is not connected")));
    }
    Ok(())
}

/// What a component sees while running.
#[derive(Clone)]
pub struct RunContext {
    pub id: String,
    pub graph: Arc<GraphContext>,
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Suspension point: fails with `Stopped` once the graph is cancelled.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ComponentError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Owner name for spill files of this component.
    pub fn spill_owner(&self) -> &str {
        &self.id
    }
}
