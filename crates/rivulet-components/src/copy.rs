//! SIMPLE_COPY: every input record to every output, without deserializing.

use crate::error::Result;
use crate::port::Ports;
use crate::traits::{Component, InitContext, RunContext};

pub const TYPE: &str = "SIMPLE_COPY";

#[derive(Debug, Default)]
pub struct SimpleCopy;

impl Component for SimpleCopy {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_inputs(1, Some(1))?;
        ctx.require_outputs(1, None)?;
        ctx.require_outputs_compatible(ctx.input(0)?)
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let mut input = ports.take_input(0)?;
        let mut bytes = Vec::new();
        while input.read_direct(&mut bytes)? {
            ctx.checkpoint()?;
            ports.broadcast_direct(&bytes)?;
        }
        Ok(())
    }
}
