//! PARTITION: route every input record to exactly one output.

use std::cmp::Ordering;
use std::sync::Arc;

use rivulet_core::key::{KeyField, RecordKey};
use rivulet_core::record::DataRecord;
use rivulet_core::value::Value;

use crate::attrs::Attrs;
use crate::error::{ComponentError, Result};
use crate::port::Ports;
use crate::traits::{Component, InitContext, RunContext};

pub const TYPE: &str = "PARTITION";

/// Chooses the output port of a record.
pub trait PartitionFunction: Send {
    /// Called once with the number of outputs and the bound key, if any.
    fn init(&mut self, outputs: usize, key: Option<&RecordKey>) -> Result<()>;

    /// Index in `0..outputs`.
    fn port(&mut self, record: &DataRecord) -> Result<usize>;

    /// Round-robin never looks at the record, so it is not deserialized.
    fn needs_record(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    next: usize,
    outputs: usize,
}

impl RoundRobin {
    fn advance(&mut self) -> usize {
        let port = self.next;
        self.next = (self.next + 1) % self.outputs;
        port
    }
}

impl PartitionFunction for RoundRobin {
    fn init(&mut self, outputs: usize, _key: Option<&RecordKey>) -> Result<()> {
        self.outputs = outputs;
        self.next = 0;
        Ok(())
    }

    fn port(&mut self, _record: &DataRecord) -> Result<usize> {
        Ok(self.advance())
    }

    fn needs_record(&self) -> bool {
        false
    }
}

/// Key hash modulo the number of outputs.
#[derive(Debug, Default)]
pub struct HashPartition {
    key: Option<RecordKey>,
    outputs: usize,
}

impl PartitionFunction for HashPartition {
    fn init(&mut self, outputs: usize, key: Option<&RecordKey>) -> Result<()> {
        let key = key.ok_or_else(|| ComponentError::config("hash partitioning needs a key"))?;
        self.key = Some(key.clone());
        self.outputs = outputs;
        Ok(())
    }

    fn port(&mut self, record: &DataRecord) -> Result<usize> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| ComponentError::fatal("partition function used before init"))?;
        Ok((key.hash_code(record) % self.outputs as u64) as usize)
    }
}

/// Inclusive upper bounds on a single key field. A record goes to the first
/// port whose bound is at least its key; larger keys go to the last port.
#[derive(Debug)]
pub struct RangePartition {
    literals: Vec<String>,
    bounds: Vec<Value>,
    field: usize,
    outputs: usize,
}

impl RangePartition {
    pub fn new(boundaries: Vec<String>) -> Self {
        Self {
            literals: boundaries,
            bounds: Vec::new(),
            field: 0,
            outputs: 0,
        }
    }
}

impl PartitionFunction for RangePartition {
    fn init(&mut self, outputs: usize, key: Option<&RecordKey>) -> Result<()> {
        let key = key.ok_or_else(|| ComponentError::config("range partitioning needs a key"))?;
        if key.len() != 1 {
            return Err(ComponentError::config(format!(
                "range partitioning works on one key field, {} given",
                key.len()
            )));
        }
        let n = self.literals.len();
        if n == 0 || n > outputs || n + 1 < outputs {
            return Err(ComponentError::config(format!(
                "{n} range boundaries cannot address {outputs} output ports"
            )));
        }
        let dt = key.data_types()[0];
        self.bounds = self
            .literals
            .iter()
            .map(|s| Value::parse_as(&dt, s))
            .collect::<rivulet_core::error::Result<Vec<_>>>()
            .map_err(ComponentError::config)?;
        if self.bounds.windows(2).any(|w| w[0].compare(&w[1]) != Ordering::Less) {
            return Err(ComponentError::config("range boundaries must be strictly ascending"));
        }
        self.field = key.field_indices()[0];
        self.outputs = outputs;
        Ok(())
    }

    fn port(&mut self, record: &DataRecord) -> Result<usize> {
        let v = record.get(self.field).unwrap_or(&Value::Null);
        let idx = self.bounds.partition_point(|b| b.compare(v) == Ordering::Less);
        Ok(idx.min(self.outputs - 1))
    }
}

pub struct Partition {
    key: Option<Vec<KeyField>>,
    function: Box<dyn PartitionFunction>,
    bound_key: Option<RecordKey>,
    outputs: usize,
}

impl Partition {
    pub fn new(key: Option<Vec<KeyField>>, function: Box<dyn PartitionFunction>) -> Self {
        Self {
            key,
            function,
            bound_key: None,
            outputs: 0,
        }
    }

    pub fn round_robin() -> Self {
        Self::new(None, Box::<RoundRobin>::default())
    }

    pub fn hash(key: Vec<KeyField>) -> Self {
        Self::new(Some(key), Box::<HashPartition>::default())
    }

    pub fn range(key: Vec<KeyField>, boundaries: Vec<String>) -> Self {
        Self::new(Some(key), Box::new(RangePartition::new(boundaries)))
    }

    /// `strategy` picks the function explicitly; otherwise `ranges` with a
    /// key means range, a key alone means hash and neither means round-robin.
    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self> {
        let key = attrs.key("key")?.filter(|k| !k.is_empty());
        let ranges = attrs.list("ranges")?;
        let strategy = match attrs.str("strategy")? {
            Some(s) => s.to_ascii_lowercase(),
            None => match (&key, &ranges) {
                (Some(_), Some(_)) => "range".to_string(),
                (Some(_), None) => "hash".to_string(),
                _ => "round_robin".to_string(),
            },
        };
        let need_key = || {
            key.clone()
                .ok_or_else(|| ComponentError::config(format!("{strategy} partitioning needs 'key'")))
        };
        match strategy.as_str() {
            "round_robin" | "roundrobin" => Ok(Self::round_robin()),
            "hash" => Ok(Self::hash(need_key()?)),
            "range" => {
                let ranges = ranges
                    .clone()
                    .ok_or_else(|| ComponentError::config("range partitioning needs 'ranges'"))?;
                Ok(Self::range(need_key()?, ranges))
            }
            other => Err(ComponentError::config(format!(
                "unknown partition strategy '{other}'"
            ))),
        }
    }
}

impl Component for Partition {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_inputs(1, Some(1))?;
        let meta = ctx.input(0)?;
        ctx.require_outputs_compatible(meta)?;
        let outputs = ctx.outputs.len();
        // every slot must be wired, a record may be routed anywhere
        ctx.require_outputs(outputs.max(1), Some(outputs))?;
        self.bound_key = match &self.key {
            Some(k) => Some(RecordKey::new(meta, k).map_err(ComponentError::config)?),
            None => None,
        };
        self.function.init(outputs, self.bound_key.as_ref())?;
        self.outputs = outputs;
        Ok(())
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let mut input = ports.take_input(0)?;
        let mut rec = DataRecord::new(Arc::clone(input.metadata()));
        let mut bytes = Vec::new();
        let needs_record = self.function.needs_record();
        let mut routed = vec![0u64; self.outputs];

        while input.read_direct(&mut bytes)? {
            ctx.checkpoint()?;
            if needs_record {
                rec.deserialize_from(&bytes)?;
            }
            let port = self.function.port(&rec)?;
            if port >= self.outputs {
                return Err(ComponentError::fatal(format!(
                    "partition function chose port {port} of {}",
                    self.outputs
                )));
            }
            ports.output(port)?.write_direct(&bytes)?;
            routed[port] += 1;
        }
        tracing::debug!(?routed, "partition finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::schema::{DataType, FieldMetadata, RecordMetadata};

    fn meta() -> Arc<RecordMetadata> {
        Arc::new(RecordMetadata::new(
            "m",
            vec![FieldMetadata::new("v", DataType::Integer)],
        ))
    }

    fn rec(v: i32) -> DataRecord {
        DataRecord::from_values(meta(), vec![Value::Integer(v)]).expect("record")
    }

    #[test]
    fn range_bounds_are_inclusive_and_overflow_to_last() {
        let key = RecordKey::new(&meta(), &[KeyField::asc("v")]).expect("key");
        let mut f = RangePartition::new(vec!["10".into(), "20".into()]);
        f.init(3, Some(&key)).expect("init");
        let ports: Vec<_> = [5, 10, 11, 20, 21]
            .iter()
            .map(|v| f.port(&rec(*v)).expect("port"))
            .collect();
        assert_eq!(ports, [0, 0, 1, 1, 2]);
    }

    #[test]
    fn range_rejects_unsorted_boundaries() {
        let key = RecordKey::new(&meta(), &[KeyField::asc("v")]).expect("key");
        let mut f = RangePartition::new(vec!["20".into(), "10".into()]);
        assert!(f.init(2, Some(&key)).is_err());
    }

    #[test]
    fn round_robin_cycles() {
        let mut f = RoundRobin::default();
        f.init(3, None).expect("init");
        let r = rec(0);
        let ports: Vec<_> = (0..7).map(|_| f.port(&r).expect("port")).collect();
        assert_eq!(ports, [0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn strategy_is_inferred() {
        let raw = serde_json::json!({ "key": "v", "ranges": "1;2" });
        assert!(Partition::from_attrs(&Attrs::new(&raw)).expect("range").function.needs_record());
        let raw = serde_json::json!({});
        assert!(!Partition::from_attrs(&Attrs::new(&raw)).expect("rr").function.needs_record());
        let raw = serde_json::json!({ "strategy": "hash" });
        assert!(Partition::from_attrs(&Attrs::new(&raw)).is_err());
    }
}
