//! Hash join: the slave input is drained into a table, then every driver
//! record probes it. Neither input needs to be sorted.

use std::sync::Arc;

use indexmap::IndexMap;

use rivulet_core::key::{HashKey, RecordKey};
use rivulet_core::record::DataRecord;
use rivulet_core::schema::RecordMetadata;

use crate::attrs::Attrs;
use crate::error::{ComponentError, Result};
use crate::port::Ports;
use crate::traits::{Component, InitContext, RunContext};
use crate::transform::{self, RecordTransform, TransformInit};

use super::{JoinKeys, JoinType};

pub const TYPE: &str = "HASH_JOIN";

struct Bound {
    driver_key: RecordKey,
    slave_key: RecordKey,
    driver_meta: Arc<RecordMetadata>,
    slave_meta: Arc<RecordMetadata>,
    out_meta: Arc<RecordMetadata>,
}

struct SlaveEntry {
    records: Vec<DataRecord>,
    matched: bool,
}

pub struct HashJoin {
    keys: JoinKeys,
    join_type: JoinType,
    slave_duplicates: bool,
    initial_capacity: Option<usize>,
    params: serde_json::Value,
    transform: Box<dyn RecordTransform>,
    bound: Option<Bound>,
}

impl HashJoin {
    pub fn new(keys: JoinKeys, transform: Box<dyn RecordTransform>) -> Self {
        Self {
            keys,
            join_type: JoinType::Inner,
            slave_duplicates: false,
            initial_capacity: None,
            params: serde_json::Value::Null,
            transform,
            bound: None,
        }
    }

    pub fn from_attrs(attrs: &Attrs<'_>, transform: Box<dyn RecordTransform>) -> Result<Self> {
        let mut join = Self::new(JoinKeys::from_attrs(attrs)?, transform)
            .join_type(JoinType::from_attrs(attrs)?)
            .slave_duplicates(attrs.bool("slave_duplicates", false)?)
            .params(attrs.raw("params").cloned().unwrap_or_default());
        if attrs.raw("hash_table_size").is_some() {
            join = join.initial_capacity(attrs.usize("hash_table_size", 0)?);
        }
        Ok(join)
    }

    pub fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    /// Keep every slave record per key instead of only the last one.
    pub fn slave_duplicates(mut self, keep_all: bool) -> Self {
        self.slave_duplicates = keep_all;
        self
    }

    /// Table capacity hint. Values below the configured default are ignored.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

impl Component for HashJoin {
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
            driver_meta: Arc::clone(driver_meta),
            slave_meta: Arc::clone(slave_meta),
            out_meta: Arc::clone(out_meta),
        });
        Ok(())
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let Self {
            join_type,
            slave_duplicates,
            initial_capacity,
            transform,
            bound,
            ..
        } = self;
        let bound = bound
            .as_ref()
            .ok_or_else(|| ComponentError::fatal("run before init"))?;
        let transform = transform.as_mut();

        let default_capacity = ctx.graph.config().hash_table_initial_capacity;
        let capacity = initial_capacity.map_or(default_capacity, |c| c.max(default_capacity));
        let mut table: IndexMap<HashKey, SlaveEntry> = IndexMap::with_capacity(capacity);
        // slaves whose key can never match (null with unequal nulls)
        let mut unkeyed: Vec<DataRecord> = Vec::new();

        let mut slave_in = ports.take_input(1)?;
        let mut rec = DataRecord::new(Arc::clone(&bound.slave_meta));
        while slave_in.read(&mut rec)? {
            ctx.checkpoint()?;
            match bound.slave_key.hash_key(&rec) {
                Some(key) => {
                    let entry = table.entry(key).or_insert_with(|| SlaveEntry {
                        records: Vec::with_capacity(1),
                        matched: false,
                    });
                    if !*slave_duplicates {
                        entry.records.clear();
                    }
                    entry.records.push(rec.clone());
                }
                None if join_type.emits_unmatched_slave() => unkeyed.push(rec.clone()),
                None => {}
            }
        }
        drop(slave_in);
        tracing::debug!(keys = table.len(), "hash join table built");

        let mut driver_in = ports.take_input(0)?;
        let mut driver = DataRecord::new(Arc::clone(&bound.driver_meta));
        let mut out = vec![DataRecord::new(Arc::clone(&bound.out_meta))];
        while driver_in.read(&mut driver)? {
            ctx.checkpoint()?;
            let hit = bound
                .driver_key
                .hash_key(&driver)
                .and_then(|k| table.get_mut(&k));
            match hit {
                Some(entry) => {
                    entry.matched = true;
                    for slave in &entry.records {
                        transform::apply(transform, &[Some(&driver), Some(slave)], &mut out, ports)?;
                    }
                }
                None if join_type.emits_unmatched_driver() => {
                    transform::apply(transform, &[Some(&driver), None], &mut out, ports)?;
                }
                None => {}
            }
        }

        if join_type.emits_unmatched_slave() {
            let never_probed = table
                .values()
                .filter(|e| !e.matched)
                .flat_map(|e| e.records.iter())
                .chain(unkeyed.iter());
            for slave in never_probed {
                ctx.checkpoint()?;
                transform::apply(transform, &[None, Some(slave)], &mut out, ports)?;
            }
        }

        transform.finished();
        Ok(())
    }
}
