//! TRASH: drain every input and drop the records.

use crate::error::Result;
use crate::port::{read_any, Ports};
use crate::traits::{Component, InitContext, RunContext};

pub const TYPE: &str = "TRASH";

#[derive(Debug, Default)]
pub struct Trash;

impl Component for Trash {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_inputs(1, None)?;
        ctx.require_outputs(0, Some(0))
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let mut inputs = ports.take_inputs();
        let mut bytes = Vec::new();
        let mut dropped = 0u64;
        while read_any(&mut inputs, &mut bytes)?.is_some() {
            ctx.checkpoint()?;
            dropped += 1;
        }
        tracing::trace!(dropped, "trash drained its inputs");
        Ok(())
    }
}
