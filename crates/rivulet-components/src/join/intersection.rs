//! Three-way split of two sorted inputs.
//!
//! Output 0 receives driver records without a slave partner, output 1 the
//! transformed matched pairs, output 2 slave records without a driver partner.
//! Any of the three may be left unconnected, but not all of them. Keys are
//! assumed unique on each side, so nothing is buffered.

use std::cmp::Ordering;
use std::sync::Arc;

use rivulet_core::key::RecordKey;
use rivulet_core::record::DataRecord;
use rivulet_core::schema::RecordMetadata;

use crate::attrs::Attrs;
use crate::error::{ComponentError, Result};
use crate::port::Ports;
use crate::sorted::SortedInput;
use crate::traits::{Component, InitContext, RunContext};
use crate::transform::{RecordTransform, TransformInit, TransformOutcome};

use super::JoinKeys;

pub const TYPE: &str = "DATA_INTERSECTION";

pub const PORT_A: usize = 0;
pub const PORT_AB: usize = 1;
pub const PORT_B: usize = 2;

struct Bound {
    driver_key: RecordKey,
    slave_key: RecordKey,
    /// Layout of the matched-pair output, when it is connected.
    out_meta: Option<Arc<RecordMetadata>>,
}

pub struct DataIntersection {
    keys: JoinKeys,
    params: serde_json::Value,
    transform: Box<dyn RecordTransform>,
    bound: Option<Bound>,
}

impl DataIntersection {
    pub fn new(keys: JoinKeys, transform: Box<dyn RecordTransform>) -> Self {
        Self {
            keys,
            params: serde_json::Value::Null,
            transform,
            bound: None,
        }
    }

    pub fn from_attrs(attrs: &Attrs<'_>, transform: Box<dyn RecordTransform>) -> Result<Self> {
        let mut this = Self::new(JoinKeys::from_attrs(attrs)?, transform);
        this.params = attrs.raw("params").cloned().unwrap_or_default();
        Ok(this)
    }
}

fn write_side(ports: &mut Ports, port: usize, rec: &DataRecord) -> Result<()> {
    if ports.has_output(port) {
        ports.output(port)?.write(rec)?;
    }
    Ok(())
}

impl Component for DataIntersection {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_inputs(2, Some(2))?;
        ctx.require_outputs(1, Some(3))?;
        let driver_meta = ctx.input(0)?;
        let slave_meta = ctx.input(1)?;
        if ctx.has_output(PORT_A) {
            driver_meta
                .check_compatible(ctx.output(PORT_A)?)
                .map_err(ComponentError::config)?;
        }
        if ctx.has_output(PORT_B) {
            slave_meta
                .check_compatible(ctx.output(PORT_B)?)
                .map_err(ComponentError::config)?;
        }
        let (driver_key, slave_key) = self.keys.resolve(driver_meta, slave_meta)?;

        let out_meta = if ctx.has_output(PORT_AB) {
            let out_meta = ctx.output(PORT_AB)?;
            self.transform
                .init(&TransformInit {
                    params: &self.params,
                    inputs: &[Arc::clone(driver_meta), Arc::clone(slave_meta)],
                    outputs: &[Arc::clone(out_meta)],
                    graph: ctx.graph,
                })
                .map_err(ComponentError::config)?;
            Some(Arc::clone(out_meta))
        } else {
            None
        };

        self.bound = Some(Bound {
            driver_key,
            slave_key,
            out_meta,
        });
        Ok(())
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let bound = self
            .bound
            .as_ref()
            .ok_or_else(|| ComponentError::fatal("run before init"))?;
        let transform = self.transform.as_mut();

        let mut driver = SortedInput::open(ports.take_input(0)?, bound.driver_key.clone(), "Driver")?;
        let mut slave = SortedInput::open(ports.take_input(1)?, bound.slave_key.clone(), "Slave")?;
        // matched pairs are only transformed when someone reads them
        let mut out: Option<Vec<DataRecord>> = bound
            .out_meta
            .as_ref()
            .map(|meta| vec![DataRecord::new(Arc::clone(meta))]);

        while driver.has() || slave.has() {
            ctx.checkpoint()?;
            let ord = match (driver.has(), slave.has()) {
                (true, true) => bound
                    .driver_key
                    .compare_with(driver.current(), &bound.slave_key, slave.current()),
                (true, false) => Ordering::Less,
                _ => Ordering::Greater,
            };
            match ord {
                Ordering::Less => {
                    write_side(ports, PORT_A, driver.current())?;
                    driver.advance()?;
                }
                Ordering::Greater => {
                    write_side(ports, PORT_B, slave.current())?;
                    slave.advance()?;
                }
                Ordering::Equal => {
                    let Some(out) = out.as_mut() else {
                        driver.advance()?;
                        slave.advance()?;
                        continue;
                    };
                    out[0].reset();
                    let outcome = transform
                        .transform(&[Some(driver.current()), Some(slave.current())], out)
                        .map_err(|e| {
                            ComponentError::Transform(transform.message().unwrap_or_else(|| e.to_string()))
                        })?;
                    match outcome {
                        TransformOutcome::Skip => {}
                        TransformOutcome::All | TransformOutcome::Port(0) => {
                            write_side(ports, PORT_AB, &out[0])?;
                        }
                        TransformOutcome::Port(n) => {
                            return Err(ComponentError::Transform(format!(
                                "transform routed to unknown output {n}; intersection has one transform output"
                            )));
                        }
                    }
                    driver.advance()?;
                    slave.advance()?;
                }
            }
        }

        if out.is_some() {
            transform.finished();
        }
        Ok(())
    }
}
