//! External merge sort over serialized records.
//!
//! Records are buffered by `RunGenerator`; full buffers become sorted runs in
//! spill storage. `finish` merges at most `fan_in` runs at a time with a
//! binary heap until one pass can stream straight to the sink.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use rivulet_core::key::{compare_key_values, RecordKey, SortOrder};
use rivulet_core::record::DataRecord;
use rivulet_core::value::Value;
use rivulet_mem::{MemoryBudgetImpl, RunMeta, RunReader, RunWriter, SpillManager};

use crate::context::GraphContext;
use crate::error::Result;

use super::run::{RunGenerator, SortItem};

pub struct ExternalSorter {
    key: RecordKey,
    orders: Arc<[SortOrder]>,
    scratch: DataRecord,
    buffer: RunGenerator,
    runs: Vec<RunMeta>,
    mgr: SpillManager,
    budget: MemoryBudgetImpl,
    fan_in: usize,
    block_bytes: usize,
    max_record_size: usize,
    records: u64,
}

impl ExternalSorter {
    pub fn new(key: RecordKey, graph: &GraphContext, owner: &str) -> Self {
        let cfg = graph.config();
        let orders: Arc<[SortOrder]> = key.orders().into();
        let budget = graph.budget().clone();
        let buffer = RunGenerator::new(
            Arc::clone(&orders),
            cfg.sort_buffer_records,
            budget.empty_guard("sort_buffer"),
        );
        Self {
            scratch: DataRecord::new(Arc::clone(key.metadata())),
            key,
            orders,
            buffer,
            runs: Vec::new(),
            mgr: graph.spill_manager(owner),
            budget,
            fan_in: cfg.sort_merge_fan_in.max(2),
            block_bytes: cfg.spill_block_bytes,
            max_record_size: cfg.max_record_size,
            records: 0,
        }
    }

    /// Override the merge fan-in (at least 2).
    pub fn with_fan_in(mut self, fan_in: usize) -> Self {
        self.fan_in = fan_in.max(2);
        self
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Runs written to spill storage so far.
    pub fn spilled_runs(&self) -> usize {
        self.runs.len()
    }

    /// Add one serialized record of the key's metadata.
    pub fn put(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.scratch.deserialize_from(&bytes)?;
        let item = SortItem {
            key: self.key.key_values(&self.scratch),
            bytes,
        };
        if !self.buffer.reserve(&item) {
            let run = self.buffer.write_run(&self.mgr, self.block_bytes)?;
            self.runs.push(run);
            self.buffer.reserve(&item);
        }
        self.buffer.push(item);
        self.records += 1;
        Ok(())
    }

    pub fn put_record(&mut self, record: &DataRecord) -> Result<()> {
        let bytes = record.to_bytes(self.max_record_size)?;
        self.put(bytes)
    }

    /// Emit every record in key order. Equal keys keep their input order.
    pub fn finish(mut self, sink: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<u64> {
        if self.runs.is_empty() {
            for item in self.buffer.drain_sorted() {
                sink(&item.bytes)?;
            }
            return Ok(self.records);
        }
        if !self.buffer.is_empty() {
            let run = self.buffer.write_run(&self.mgr, self.block_bytes)?;
            self.runs.push(run);
        }

        let mut merger = Merger {
            mgr: &self.mgr,
            budget: &self.budget,
            key: &self.key,
            orders: &self.orders,
            scratch: &mut self.scratch,
        };
        let mut runs = std::mem::take(&mut self.runs);
        let mut pass = 0;
        while runs.len() > self.fan_in {
            pass += 1;
            let rest = runs.split_off(self.fan_in);
            let mut writer = RunWriter::new(&self.mgr, self.block_bytes);
            merger.merge(runs, &mut |b| writer.push(b).map_err(Into::into))?;
            // the merged run holds the earliest records, so it goes first
            runs = Vec::with_capacity(rest.len() + 1);
            runs.push(writer.finish()?);
            runs.extend(rest);
            tracing::debug!(pass, runs = runs.len(), "intermediate merge pass");
        }
        merger.merge(runs, sink)?;
        self.mgr.cleanup()?;
        Ok(self.records)
    }
}

struct Merger<'a> {
    mgr: &'a SpillManager,
    budget: &'a MemoryBudgetImpl,
    key: &'a RecordKey,
    orders: &'a Arc<[SortOrder]>,
    scratch: &'a mut DataRecord,
}

impl Merger<'_> {
    fn merge(&mut self, runs: Vec<RunMeta>, sink: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        let mut readers: Vec<RunReader> = runs.into_iter().map(RunReader::new).collect();
        let mut heap = BinaryHeap::with_capacity(readers.len());

        for (run, reader) in readers.iter_mut().enumerate() {
            let mut bytes = Vec::new();
            if reader.next(self.mgr, self.budget, &mut bytes)? {
                heap.push(self.entry(run, bytes)?);
            }
        }

        while let Some(MergeEntry { run, mut bytes, .. }) = heap.pop() {
            sink(&bytes)?;
            if readers[run].next(self.mgr, self.budget, &mut bytes)? {
                heap.push(self.entry(run, bytes)?);
            }
        }

        for reader in readers {
            reader.discard(self.mgr)?;
        }
        Ok(())
    }

    fn entry(&mut self, run: usize, bytes: Vec<u8>) -> Result<MergeEntry> {
        self.scratch.deserialize_from(&bytes)?;
        Ok(MergeEntry {
            key: self.key.key_values(self.scratch),
            orders: Arc::clone(self.orders),
            run,
            bytes,
        })
    }
}

/// Heap entry: the head record of one run.
struct MergeEntry {
    key: Vec<Value>,
    orders: Arc<[SortOrder]>,
    run: usize,
    bytes: Vec<u8>,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap; earlier runs win ties
        compare_key_values(&other.key, &self.key, &self.orders).then_with(|| other.run.cmp(&self.run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::config::EngineConfig;
    use rivulet_core::schema::{DataType, FieldMetadata, RecordMetadata};
    use rivulet_io::MemoryStorage;

    fn graph(sort_buffer_records: usize) -> GraphContext {
        let cfg = EngineConfig {
            spill_dir: "memory://sort".into(),
            sort_buffer_records,
            spill_block_bytes: 64,
            ..EngineConfig::default()
        };
        GraphContext::new(cfg, Arc::new(MemoryStorage::new())).expect("graph")
    }

    fn meta() -> Arc<RecordMetadata> {
        Arc::new(RecordMetadata::new(
            "r",
            vec![
                FieldMetadata::new("k", DataType::Integer),
                FieldMetadata::new("seq", DataType::Integer),
            ],
        ))
    }

    fn sort(keys: &[i32], buffer: usize, fan_in: usize, spec: &str) -> (Vec<(i32, i32)>, usize) {
        let graph = graph(buffer);
        let meta = meta();
        let key = RecordKey::parse(&meta, spec).expect("key");
        let mut sorter = ExternalSorter::new(key, &graph, "test").with_fan_in(fan_in);
        for (seq, k) in keys.iter().enumerate() {
            let rec = DataRecord::from_values(Arc::clone(&meta), vec![(*k).into(), (seq as i32).into()])
                .expect("record");
            sorter.put_record(&rec).expect("put");
        }
        let spilled = sorter.spilled_runs();
        let mut out = Vec::new();
        let mut rec = DataRecord::new(Arc::clone(&meta));
        sorter
            .finish(&mut |b| {
                rec.deserialize_from(b)?;
                let k = rec.get(0).and_then(Value::as_i64).unwrap_or(-1) as i32;
                let s = rec.get(1).and_then(Value::as_i64).unwrap_or(-1) as i32;
                out.push((k, s));
                Ok(())
            })
            .expect("finish");
        (out, spilled)
    }

    #[test]
    fn in_memory_sort_is_stable() {
        let (out, spilled) = sort(&[3, 1, 2, 1], 100, 4, "k");
        assert_eq!(spilled, 0);
        assert_eq!(out, vec![(1, 1), (1, 3), (2, 2), (3, 0)]);
    }

    #[test]
    fn spilled_multi_pass_merge_matches_in_memory() {
        let keys: Vec<i32> = (0..200).map(|i| (i * 37) % 23).collect();
        let (out, spilled) = sort(&keys, 7, 3, "k");
        assert!(spilled > 3, "expected several runs, got {spilled}");
        let (expected, _) = sort(&keys, 1000, 3, "k");
        assert_eq!(out, expected);
        assert_eq!(out.len(), 200);
    }

    #[test]
    fn descending_order() {
        let (out, _) = sort(&[1, 5, 3, 5], 2, 2, "k(d)");
        let ks: Vec<i32> = out.iter().map(|(k, _)| *k).collect();
        assert_eq!(ks, vec![5, 5, 3, 1]);
        // stability across spilled runs
        assert_eq!(out[0], (5, 1));
        assert_eq!(out[1], (5, 3));
    }
}
