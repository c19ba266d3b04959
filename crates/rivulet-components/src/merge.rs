//! MERGE: interleave inputs that are each sorted by the same key into one
//! sorted stream. Ties go to the lower input port.

use std::cmp::Ordering;

use rivulet_core::key::{KeyField, RecordKey};

use crate::attrs::Attrs;
use crate::error::{ComponentError, Result};
use crate::port::Ports;
use crate::sorted::SortedInput;
use crate::traits::{Component, InitContext, RunContext};

pub const TYPE: &str = "MERGE";

pub struct Merge {
    key: Vec<KeyField>,
    keys: Vec<RecordKey>,
}

impl Merge {
    pub fn new(key: Vec<KeyField>) -> Self {
        Self {
            key,
            keys: Vec::new(),
        }
    }

    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self> {
        Ok(Self::new(attrs.require_key("key")?))
    }
}

impl Component for Merge {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        let slots = ctx.inputs.len();
        ctx.require_inputs(slots.max(1), Some(slots))?;
        ctx.require_outputs(1, None)?;
        let first = ctx.input(0)?;
        ctx.require_outputs_compatible(first)?;
        self.keys = (0..slots)
            .map(|i| {
                let meta = ctx.input(i)?;
                first.check_compatible(meta).map_err(ComponentError::config)?;
                RecordKey::new(meta, &self.key).map_err(ComponentError::config)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let mut inputs = ports
            .take_inputs()
            .into_iter()
            .zip(self.keys.iter().cloned())
            .map(|(port, key)| SortedInput::open(port, key, "Input"))
            .collect::<Result<Vec<_>>>()?;

        loop {
            ctx.checkpoint()?;
            let mut best: Option<usize> = None;
            for (i, input) in inputs.iter().enumerate() {
                if !input.has() {
                    continue;
                }
                best = match best {
                    Some(b)
                        if inputs[b]
                            .key()
                            .compare_with(inputs[b].current(), input.key(), input.current())
                            != Ordering::Greater =>
                    {
                        Some(b)
                    }
                    _ => Some(i),
                };
            }
            let Some(i) = best else {
                return Ok(());
            };
            ports.broadcast(inputs[i].current())?;
            inputs[i].advance()?;
        }
    }
}
