//! In-memory run buffer of the external sorter.
//!
//! Records are held serialized next to their key projection. When the buffer
//! is full (record limit or memory budget) it is sorted and written out as one
//! run.

use std::sync::Arc;

use rivulet_core::key::{compare_key_values, SortOrder};
use rivulet_core::value::Value;
use rivulet_mem::{BudgetGuardImpl, RunMeta, RunWriter, SpillManager};

use crate::error::Result;

pub(crate) struct SortItem {
    pub key: Vec<Value>,
    pub bytes: Vec<u8>,
}

impl SortItem {
    /// Rough heap footprint, charged to the budget.
    pub fn footprint(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.bytes.len()
            + self.key.len() * std::mem::size_of::<Value>()
    }
}

pub(crate) struct RunGenerator {
    orders: Arc<[SortOrder]>,
    items: Vec<SortItem>,
    max_records: usize,
    guard: BudgetGuardImpl,
}

impl RunGenerator {
    pub fn new(orders: Arc<[SortOrder]>, max_records: usize, guard: BudgetGuardImpl) -> Self {
        Self {
            orders,
            items: Vec::new(),
            max_records: max_records.max(1),
            guard,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Reserve room for `item`. `false` means the buffer has to be spilled
    /// first. An empty buffer always accepts one record.
    pub fn reserve(&mut self, item: &SortItem) -> bool {
        if self.items.len() >= self.max_records {
            return false;
        }
        self.guard.try_grow(item.footprint()) || self.items.is_empty()
    }

    pub fn push(&mut self, item: SortItem) {
        self.items.push(item);
    }

    fn sort(&mut self) {
        let orders = Arc::clone(&self.orders);
        // stable, so equal keys keep their arrival order
        self.items
            .sort_by(|a, b| compare_key_values(&a.key, &b.key, &orders));
    }

    /// Sort the buffer and write it as a new run. The buffer is left empty
    /// and its budget released.
    pub fn write_run(&mut self, mgr: &SpillManager, block_bytes: usize) -> Result<RunMeta> {
        self.sort();
        let mut writer = RunWriter::new(mgr, block_bytes);
        for item in &self.items {
            writer.push(&item.bytes)?;
        }
        let meta = writer.finish()?;
        tracing::debug!(
            run = meta.run_index,
            records = meta.records,
            held_bytes = self.guard_bytes(),
            "sorted run spilled"
        );
        self.items.clear();
        self.guard.release_all();
        Ok(meta)
    }

    /// Sorted contents, emptying the buffer.
    pub fn drain_sorted(&mut self) -> std::vec::Drain<'_, SortItem> {
        self.sort();
        self.items.drain(..)
    }

    fn guard_bytes(&self) -> usize {
        use rivulet_core::budget::BudgetGuard;
        self.guard.bytes()
    }
}
