//! GENERATOR: a source driven by a `RecordGenerate` collaborator.

use std::sync::Arc;

use rivulet_core::record::DataRecord;
use rivulet_core::value::Value;

use crate::attrs::Attrs;
use crate::error::{ComponentError, Result};
use crate::port::Ports;
use crate::traits::{Component, InitContext, RunContext};
use crate::transform::{self, RecordGenerate, TransformError, TransformInit, TransformOutcome};

pub const TYPE: &str = "GENERATOR";

/// Generates a fixed list of rows. Each row is a JSON array with one value
/// per field of the first output, converted to the field's type.
#[derive(Debug, Clone, Default)]
pub struct RecordList {
    rows: Vec<serde_json::Value>,
    parsed: Vec<Vec<Value>>,
    next: usize,
}

impl RecordList {
    pub fn new(rows: Vec<serde_json::Value>) -> Self {
        Self {
            rows,
            parsed: Vec::new(),
            next: 0,
        }
    }
}

impl RecordGenerate for RecordList {
    fn init(&mut self, ctx: &TransformInit<'_>) -> std::result::Result<(), TransformError> {
        let meta = ctx
            .outputs
            .first()
            .ok_or_else(|| TransformError::failed("generator has no output"))?;
        self.parsed = self
            .rows
            .iter()
            .enumerate()
            .map(|(n, row)| {
                let items = row
                    .as_array()
                    .filter(|a| a.len() == meta.len())
                    .ok_or_else(|| {
                        TransformError::failed(format!(
                            "row {n} must be an array of {} values",
                            meta.len()
                        ))
                    })?;
                items
                    .iter()
                    .zip(meta.fields.iter())
                    .map(|(v, f)| Value::from_json(&f.data_type, v).map_err(TransformError::from))
                    .collect::<std::result::Result<Vec<_>, TransformError>>()
            })
            .collect::<std::result::Result<Vec<_>, TransformError>>()?;
        self.next = 0;
        Ok(())
    }

    fn generate(
        &mut self,
        outputs: &mut [DataRecord],
    ) -> std::result::Result<Option<TransformOutcome>, TransformError> {
        let Some(row) = self.parsed.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        for out in outputs.iter_mut() {
            for (i, v) in row.iter().enumerate() {
                out.set(i, v.clone())?;
            }
        }
        Ok(Some(TransformOutcome::All))
    }
}

pub struct Generator {
    params: serde_json::Value,
    generate: Box<dyn RecordGenerate>,
    outputs: Vec<DataRecord>,
}

impl Generator {
    pub fn new(generate: Box<dyn RecordGenerate>) -> Self {
        Self {
            params: serde_json::Value::Null,
            generate,
            outputs: Vec::new(),
        }
    }

    /// Without a collaborator the `records` attribute lists the rows.
    pub fn from_attrs(attrs: &Attrs<'_>, generate: Option<Box<dyn RecordGenerate>>) -> Result<Self> {
        let generate = match generate {
            Some(g) => g,
            None => {
                let rows = attrs
                    .raw("records")
                    .and_then(serde_json::Value::as_array)
                    .cloned()
                    .ok_or_else(|| {
                        ComponentError::config("GENERATOR needs a generator or a 'records' list")
                    })?;
                Box::new(RecordList::new(rows))
            }
        };
        let mut this = Self::new(generate);
        this.params = attrs.raw("params").cloned().unwrap_or_default();
        Ok(this)
    }
}

impl Component for Generator {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_inputs(0, Some(0))?;
        let slots = ctx.outputs.len();
        ctx.require_outputs(slots.max(1), Some(slots))?;
        let out_metas = (0..slots)
            .map(|i| ctx.output(i).map(Arc::clone))
            .collect::<Result<Vec<_>>>()?;
        self.generate
            .init(&TransformInit {
                params: &self.params,
                inputs: &[],
                outputs: &out_metas,
                graph: ctx.graph,
            })
            .map_err(ComponentError::config)?;
        self.outputs = out_metas.into_iter().map(DataRecord::new).collect();
        Ok(())
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        loop {
            ctx.checkpoint()?;
            for out in self.outputs.iter_mut() {
                out.reset();
            }
            match self.generate.generate(&mut self.outputs)? {
                Some(outcome) => transform::route(outcome, &self.outputs, ports)?,
                None => return Ok(()),
            }
        }
    }
}
