//! Sort-merge join.
//!
//! Both inputs arrive sorted by the join key. Each slave key group is
//! buffered in a `RecordBuffer` and replayed once per driver record of the
//! same key, so the emitted pairs of a key are |driver group| x |slave group|.

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
use crate::transform::{self, RecordTransform, TransformInit};

use super::{JoinKeys, JoinType};

pub const TYPE: &str = "MERGE_JOIN";

struct Bound {
    driver_key: RecordKey,
    slave_key: RecordKey,
    slave_meta: Arc<RecordMetadata>,
    out_meta: Arc<RecordMetadata>,
}

pub struct MergeJoin {
    keys: JoinKeys,
    join_type: JoinType,
    slave_duplicates: bool,
    params: serde_json::Value,
    transform: Box<dyn RecordTransform>,
    bound: Option<Bound>,
}

impl MergeJoin {
    pub fn new(keys: JoinKeys, transform: Box<dyn RecordTransform>) -> Self {
        Self {
            keys,
            join_type: JoinType::Inner,
            slave_duplicates: true,
            params: serde_json::Value::Null,
            transform,
            bound: None,
        }
    }

    pub fn from_attrs(attrs: &Attrs<'_>, transform: Box<dyn RecordTransform>) -> Result<Self> {
        Ok(Self::new(JoinKeys::from_attrs(attrs)?, transform)
            .join_type(JoinType::from_attrs(attrs)?)
            .slave_duplicates(attrs.bool("slave_duplicates", true)?)
            .params(attrs.raw("params").cloned().unwrap_or_default()))
    }

    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    /// When false only the first slave record of each key group is joined.
    pub fn slave_duplicates(mut self, allow: bool) -> Self {
        self.slave_duplicates = allow;
        self
    }

    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

impl Component for MergeJoin {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_inputs(2, Some(2))?;
        ctx.require_outputs(1, Some(1))?;
        let driver_meta = ctx.input(0)?;
        let slave_meta = ctx.input(1)?;
        let out_meta = ctx.output(0)?;
        let (driver_key, slave_key) = self.keys.resolve(driver_meta, slave_meta)?;

        self.transform
            .init(&TransformInit {
                params: &self.params,
                inputs: &[Arc::clone(driver_meta), Arc::clone(slave_meta)],
                outputs: &[Arc::clone(out_meta)],
                graph: ctx.graph,
            })
            .map_err(ComponentError::config)?;

        self.bound = Some(Bound {
            driver_key,
            slave_key,
            slave_meta: Arc::clone(slave_meta),
            out_meta: Arc::clone(out_meta),
        });
        tracing::debug!(join_type = ?self.join_type, "merge join initialised");
        Ok(())
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let Self {
            join_type,
            slave_duplicates,
            transform,
            bound,
            ..
        } = self;
        let bound = bound
            .as_ref()
            .ok_or_else(|| ComponentError::fatal("run before init"))?;
        let transform = transform.as_mut();
        let max_size = ctx.graph.config().max_record_size;

        let mut driver = SortedInput::open(ports.take_input(0)?, bound.driver_key.clone(), "Driver")?;
        let mut slave = SortedInput::open(ports.take_input(1)?, bound.slave_key.clone(), "Slave")?;

        let mut group = ctx.graph.record_buffer();
        let mut group_rec = DataRecord::new(Arc::clone(&bound.slave_meta));
        let mut out = vec![DataRecord::new(Arc::clone(&bound.out_meta))];
        let mut bytes = Vec::new();
        let mut pairs = 0u64;

        while driver.has() {
            ctx.checkpoint()?;
            let ord = if slave.has() {
                bound
                    .driver_key
                    .compare_with(driver.current(), &bound.slave_key, slave.current())
            } else {
                Ordering::Less
            };
            match ord {
                Ordering::Less => {
                    if join_type.emits_unmatched_driver() {
                        transform::apply(transform, &[Some(driver.current()), None], &mut out, ports)?;
                    }
                    driver.advance()?;
                }
                Ordering::Greater => {
                    if join_type.emits_unmatched_slave() {
                        transform::apply(transform, &[None, Some(slave.current())], &mut out, ports)?;
                    }
                    slave.advance()?;
                }
                Ordering::Equal => {
                    group.clear()?;
                    slave.current().serialize_into(&mut bytes, max_size)?;
                    group.push(&bytes)?;
                    if *slave_duplicates {
                        while slave.advance()? == Some(Ordering::Equal) {
                            slave.current().serialize_into(&mut bytes, max_size)?;
                            group.push(&bytes)?;
                        }
                    } else {
                        slave.skip_group()?;
                    }
                    if group.spilled() {
                        tracing::debug!(records = group.len(), "slave key group spilled to disk");
                    }
                    loop {
                        group.rewind()?;
                        while group.next_into(&mut bytes)? {
                            group_rec.deserialize_from(&bytes)?;
                            transform::apply(
                                transform,
                                &[Some(driver.current()), Some(&group_rec)],
                                &mut out,
                                ports,
                            )?;
                            pairs += 1;
                        }
                        if driver.advance()? != Some(Ordering::Equal) {
                            break;
                        }
                        ctx.checkpoint()?;
                    }
                }
            }
        }

        if join_type.emits_unmatched_slave() {
            while slave.has() {
                ctx.checkpoint()?;
                transform::apply(transform, &[None, Some(slave.current())], &mut out, ports)?;
                slave.advance()?;
            }
        }

        transform.finished();
        tracing::debug!(pairs, "merge join finished");
        Ok(())
    }
}
