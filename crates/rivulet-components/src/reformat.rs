//! REFORMAT: one transform call per input record, routed by its outcome.

use std::sync::Arc;

use rivulet_core::record::DataRecord;

use crate::attrs::Attrs;
use crate::error::{ComponentError, Result};
use crate::port::Ports;
use crate::traits::{Component, InitContext, RunContext};
use crate::transform::{self, RecordTransform, TransformInit};

pub const TYPE: &str = "REFORMAT";

pub struct Reformat {
    params: serde_json::Value,
    transform: Box<dyn RecordTransform>,
    outputs: Vec<DataRecord>,
}

impl Reformat {
    pub fn new(transform: Box<dyn RecordTransform>) -> Self {
        Self {
            params: serde_json::Value::Null,
            transform,
            outputs: Vec::new(),
        }
    }

    pub fn from_attrs(attrs: &Attrs<'_>, transform: Box<dyn RecordTransform>) -> Result<Self> {
        let mut this = Self::new(transform);
        this.params = attrs.raw("params").cloned().unwrap_or_default();
        Ok(this)
    }
}

impl Component for Reformat {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_inputs(1, Some(1))?;
        let slots = ctx.outputs.len();
        ctx.require_outputs(slots.max(1), Some(slots))?;
        let in_meta = ctx.input(0)?;
        let out_metas = (0..slots)
            .map(|i| ctx.output(i).map(Arc::clone))
            .collect::<Result<Vec<_>>>()?;
        self.transform
            .init(&TransformInit {
                params: &self.params,
                inputs: &[Arc::clone(in_meta)],
                outputs: &out_metas,
                graph: ctx.graph,
            })
            .map_err(ComponentError::config)?;
        self.outputs = out_metas.into_iter().map(DataRecord::new).collect();
        Ok(())
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let mut input = ports.take_input(0)?;
        let mut rec = DataRecord::new(Arc::clone(input.metadata()));
        let transform = self.transform.as_mut();
        while input.read(&mut rec)? {
            ctx.checkpoint()?;
            transform::apply(transform, &[Some(&rec)], &mut self.outputs, ports)?;
        }
        transform.finished();
        Ok(())
    }
}
