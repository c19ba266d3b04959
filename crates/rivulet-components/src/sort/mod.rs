//! SORT: blocking external sort of one input.

pub mod external;
mod run;

use rivulet_core::key::{KeyField, RecordKey};

use crate::attrs::Attrs;
use crate::error::{ComponentError, Result};
use crate::port::Ports;
use crate::traits::{Component, InitContext, RunContext};

pub use external::ExternalSorter;

pub const TYPE: &str = "SORT";

pub struct Sort {
    key: Vec<KeyField>,
    fan_in: Option<usize>,
    bound: Option<RecordKey>,
}

impl Sort {
    pub fn new(key: Vec<KeyField>) -> Self {
        Self {
            key,
            fan_in: None,
            bound: None,
        }
    }

    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self> {
        let mut sort = Self::new(attrs.require_key("key")?);
        if attrs.raw("fan_in").is_some() {
            sort.fan_in = Some(attrs.usize("fan_in", 2)?);
        }
        Ok(sort)
    }
}

impl Component for Sort {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_inputs(1, Some(1))?;
        ctx.require_outputs(1, None)?;
        let meta = ctx.input(0)?;
        ctx.require_outputs_compatible(meta)?;
        self.bound = Some(RecordKey::new(meta, &self.key).map_err(ComponentError::config)?);
        Ok(())
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let key = self
            .bound
            .clone()
            .ok_or_else(|| ComponentError::fatal("run before init"))?;
        let mut sorter = ExternalSorter::new(key, &ctx.graph, ctx.spill_owner());
        if let Some(fan_in) = self.fan_in {
            sorter = sorter.with_fan_in(fan_in);
        }

        let mut input = ports.take_input(0)?;
        let mut bytes = Vec::new();
        while input.read_direct(&mut bytes)? {
            ctx.checkpoint()?;
            sorter.put(std::mem::take(&mut bytes))?;
        }
        drop(input);

        let runs = sorter.spilled_runs();
        let records = sorter.finish(&mut |rec| {
            ctx.checkpoint()?;
            ports.broadcast_direct(rec)
        })?;
        tracing::debug!(records, runs, "sort finished");
        Ok(())
    }
}
