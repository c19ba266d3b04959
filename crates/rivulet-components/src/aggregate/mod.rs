//! AGGREGATE: one output record per key group.
//!
//! In sorted mode a group closes when the key changes, so only one group is
//! held at a time. Unsorted mode keeps every group in a table and emits them
//! at end of input in first-seen order.
//!
//! Output fields named like key fields receive the group's key values; every
//! mapping writes its result into its own output field.

pub mod function;

use std::cmp::Ordering;
use std::sync::Arc;

use indexmap::IndexMap;

use rivulet_core::key::{HashKey, KeyField, RecordKey};
use rivulet_core::record::DataRecord;
use rivulet_core::schema::{FieldMetadata, RecordMetadata};

use crate::attrs::Attrs;
use crate::error::{ComponentError, Result};
use crate::port::Ports;
use crate::traits::{Component, InitContext, RunContext};

pub use function::{AggFunction, AggSpec};
use function::{Accumulator, BoundFunction};

pub const TYPE: &str = "AGGREGATE";

/// Layout of the conventional aggregate output: key fields in key order,
/// then one field per mapping typed after its function.
pub fn conventional_metadata(
    name: &str,
    input: &RecordMetadata,
    key: &[KeyField],
    mapping: &[AggSpec],
) -> Result<RecordMetadata> {
    let mut fields = Vec::with_capacity(key.len() + mapping.len());
    for kf in key {
        let f = input
            .field_index(&kf.name)
            .and_then(|i| input.field(i))
            .ok_or_else(|| ComponentError::config(format!("key field '{}' not found", kf.name)))?;
        fields.push(f.clone());
    }
    for spec in mapping {
        let in_type = match &spec.input {
            Some(n) => Some(
                input
                    .field_index(n)
                    .and_then(|i| input.field(i))
                    .ok_or_else(|| ComponentError::config(format!("field '{n}' not found")))?
                    .data_type,
            ),
            None => None,
        };
        fields.push(FieldMetadata::new(
            spec.output.clone(),
            spec.function.result_type(in_type),
        ));
    }
    Ok(RecordMetadata::new(name, fields))
}

struct Bound {
    key: RecordKey,
    in_meta: Arc<RecordMetadata>,
    out_meta: Arc<RecordMetadata>,
    functions: Vec<BoundFunction>,
    // (position in key, output field index)
    key_outputs: Vec<(usize, usize)>,
}

impl Bound {
    fn fresh(&self) -> Vec<Accumulator> {
        self.functions.iter().map(BoundFunction::accumulator).collect()
    }

    fn update(&self, accs: &mut [Accumulator], rec: &DataRecord) -> Result<()> {
        for (f, acc) in self.functions.iter().zip(accs.iter_mut()) {
            f.update(acc, rec)?;
        }
        Ok(())
    }

    fn emit(
        &self,
        key_values: &[rivulet_core::value::Value],
        accs: &[Accumulator],
        out: &mut DataRecord,
        ports: &mut Ports,
    ) -> Result<()> {
        out.reset();
        for (pos, idx) in &self.key_outputs {
            out.set(*idx, key_values[*pos].clone())?;
        }
        for (f, acc) in self.functions.iter().zip(accs) {
            f.write(acc, out)?;
        }
        ports.broadcast(out)
    }
}

pub struct Aggregate {
    key: Vec<KeyField>,
    mapping: Vec<AggSpec>,
    sorted: bool,
    equal_nulls: bool,
    bound: Option<Bound>,
}

impl Aggregate {
    pub fn new(key: Vec<KeyField>, mapping: Vec<AggSpec>) -> Self {
        Self {
            key,
            mapping,
            sorted: true,
            equal_nulls: true,
            bound: None,
        }
    }

    /// `mapping` is either a `;` separated string of `out:=fn(field)` or a
    /// list of such strings.
    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self> {
        let mapping = match attrs.list("mapping")? {
            Some(items) => items
                .iter()
                .map(|s| AggSpec::parse(s))
                .collect::<Result<Vec<_>>>()?,
            None => return Err(ComponentError::config("attribute 'mapping' is required")),
        };
        Ok(Self::new(attrs.key("key")?.unwrap_or_default(), mapping)
            .sorted(attrs.bool("sorted", true)?)
            .equal_nulls(attrs.bool("equal_nulls", true)?))
    }

    pub fn sorted(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }

    pub fn equal_nulls(mut self, equal_nulls: bool) -> Self {
        self.equal_nulls = equal_nulls;
        self
    }

    fn run_sorted(&self, bound: &Bound, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let mut input = ports.take_input(0)?;
        let mut prev = DataRecord::new(Arc::clone(&bound.in_meta));
        let mut cur = DataRecord::new(Arc::clone(&bound.in_meta));
        let mut out = DataRecord::new(Arc::clone(&bound.out_meta));
        let mut accs = bound.fresh();
        let mut groups = 0u64;
        let mut started = false;

        while input.read(&mut cur)? {
            ctx.checkpoint()?;
            if started {
                match bound.key.compare(&prev, &cur) {
                    Ordering::Equal => {}
                    Ordering::Less => {
                        bound.emit(&bound.key.key_values(&prev), &accs, &mut out, ports)?;
                        groups += 1;
                        accs = bound.fresh();
                    }
                    Ordering::Greater => {
                        return Err(ComponentError::OutOfOrder(format!(
                            "Input record out of order! '{}' follows '{}'",
                            bound.key.key_string(&cur),
                            bound.key.key_string(&prev)
                        )));
                    }
                }
            }
            started = true;
            bound.update(&mut accs, &cur)?;
            std::mem::swap(&mut prev, &mut cur);
        }
        if started {
            bound.emit(&bound.key.key_values(&prev), &accs, &mut out, ports)?;
            groups += 1;
        }
        tracing::debug!(groups, "sorted aggregate finished");
        Ok(())
    }

    fn run_unsorted(&self, bound: &Bound, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        #[derive(PartialEq, Eq, Hash)]
        enum GroupId {
            Key(HashKey),
            // null key with unequal nulls: a group of its own
            Lone(u64),
        }
        struct GroupSlot {
            key_values: Vec<rivulet_core::value::Value>,
            accs: Vec<Accumulator>,
        }

        let capacity = ctx.graph.config().aggregate_group_initial_capacity;
        let mut groups: IndexMap<GroupId, GroupSlot> = IndexMap::with_capacity(capacity);
        let mut lone = 0u64;
        let mut input = ports.take_input(0)?;
        let mut rec = DataRecord::new(Arc::clone(&bound.in_meta));

        while input.read(&mut rec)? {
            ctx.checkpoint()?;
            let id = match bound.key.hash_key(&rec) {
                Some(k) => GroupId::Key(k),
                None => {
                    lone += 1;
                    GroupId::Lone(lone)
                }
            };
            let slot = groups.entry(id).or_insert_with(|| GroupSlot {
                key_values: bound.key.key_values(&rec),
                accs: bound.fresh(),
            });
            bound.update(&mut slot.accs, &rec)?;
        }

        let mut out = DataRecord::new(Arc::clone(&bound.out_meta));
        for slot in groups.values() {
            ctx.checkpoint()?;
            bound.emit(&slot.key_values, &slot.accs, &mut out, ports)?;
        }
        tracing::debug!(groups = groups.len(), "unsorted aggregate finished");
        Ok(())
    }
}

impl Component for Aggregate {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_inputs(1, Some(1))?;
        ctx.require_outputs(1, None)?;
        let in_meta = ctx.input(0)?;
        let out_meta = ctx.output(0)?;
        for i in 1..ctx.output_count() {
            if ctx.has_output(i) {
                out_meta
                    .check_compatible(ctx.output(i)?)
                    .map_err(ComponentError::config)?;
            }
        }
        if self.mapping.is_empty() && self.key.is_empty() {
            return Err(ComponentError::config("aggregate needs a key or at least one mapping"));
        }
        let key = RecordKey::new(in_meta, &self.key)
            .map_err(ComponentError::config)?
            .with_equal_nulls(self.equal_nulls);
        let functions = self
            .mapping
            .iter()
            .map(|spec| BoundFunction::bind(spec, in_meta, out_meta))
            .collect::<Result<Vec<_>>>()?;
        let key_outputs = self
            .key
            .iter()
            .enumerate()
            .filter_map(|(pos, kf)| out_meta.field_index(&kf.name).map(|idx| (pos, idx)))
            .filter(|(_, idx)| !functions.iter().any(|f| f.output == *idx))
            .collect();
        self.bound = Some(Bound {
            key,
            in_meta: Arc::clone(in_meta),
            out_meta: Arc::clone(out_meta),
            functions,
            key_outputs,
        });
        Ok(())
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let bound = self
            .bound
            .as_ref()
            .ok_or_else(|| ComponentError::fatal("run before init"))?;
        if self.sorted {
            self.run_sorted(bound, ports, ctx)
        } else {
            self.run_unsorted(bound, ports, ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::schema::DataType;

    fn input() -> RecordMetadata {
        RecordMetadata::new(
            "in",
            vec![
                FieldMetadata::new("group", DataType::String),
                FieldMetadata::new("value", DataType::Integer),
                FieldMetadata::new("price", DataType::Number),
            ],
        )
    }

    #[test]
    fn conventional_layout_puts_key_first() {
        let mapping = AggSpec::parse_list("total:=sum(value);n:=count();avg_price:=avg(price)")
            .expect("mapping");
        let meta = conventional_metadata("out", &input(), &[KeyField::asc("group")], &mapping)
            .expect("layout");
        let names: Vec<_> = meta.field_names().collect();
        assert_eq!(names, ["group", "total", "n", "avg_price"]);
        assert_eq!(meta.fields[1].data_type, DataType::Long);
        assert_eq!(meta.fields[2].data_type, DataType::Long);
        assert_eq!(meta.fields[3].data_type, DataType::Number);
    }

    #[test]
    fn sum_of_text_is_rejected() {
        let out = RecordMetadata::new("out", vec![FieldMetadata::new("s", DataType::Long)]);
        let spec = AggSpec::parse("s:=sum(group)").expect("parse");
        assert!(BoundFunction::bind(&spec, &input(), &out).is_err());
    }
}
