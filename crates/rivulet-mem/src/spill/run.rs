//! Sorted runs: length-prefixed records packed into spill segments.

use rivulet_core::budget::MemoryBudget;

use super::{SegmentMeta, SpillManager};
use crate::error::{Error, Result};
use crate::guard::BudgetGuardImpl;

/// A finished run: its segments in write order and the record count.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_index: u32,
    pub blocks: Vec<SegmentMeta>,
    pub records: u64,
}

/// Appends records to a new run, flushing a segment every `block_limit` bytes.
pub struct RunWriter<'a> {
    mgr: &'a SpillManager,
    run_index: u32,
    block: Vec<u8>,
    block_limit: usize,
    blocks: Vec<SegmentMeta>,
    records: u64,
}

impl<'a> RunWriter<'a> {
    pub fn new(mgr: &'a SpillManager, block_limit: usize) -> Self {
        Self {
            mgr,
            run_index: mgr.next_run_index(),
            block: Vec::with_capacity(block_limit.min(1 << 20)),
            block_limit: block_limit.max(1),
            blocks: Vec::new(),
            records: 0,
        }
    }

    pub fn push(&mut self, record: &[u8]) -> Result<()> {
        let len = u32::try_from(record.len())
            .map_err(|_| Error::Storage(format!("record of {} bytes too large to spill", record.len())))?;
        self.block.extend_from_slice(&len.to_le_bytes());
        self.block.extend_from_slice(record);
        self.records += 1;
        if self.block.len() >= self.block_limit {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let meta = self
            .mgr
            .write_block(self.run_index, self.blocks.len() as u32, &self.block)?;
        self.blocks.push(meta);
        self.block.clear();
        Ok(())
    }

    pub fn finish(mut self) -> Result<RunMeta> {
        self.flush()?;
        Ok(RunMeta {
            run_index: self.run_index,
            blocks: std::mem::take(&mut self.blocks),
            records: self.records,
        })
    }
}

/// Sequential reader over one run. Holds at most one decoded segment.
pub struct RunReader {
    meta: RunMeta,
    next_block: usize,
    block: Vec<u8>,
    pos: usize,
}

impl RunReader {
    pub fn new(meta: RunMeta) -> Self {
        Self {
            meta,
            next_block: 0,
            block: Vec::new(),
            pos: 0,
        }
    }

    pub fn meta(&self) -> &RunMeta {
        &self.meta
    }

    /// Copy the next record into `out`. `Ok(false)` once the run is exhausted.
    pub fn next(
        &mut self,
        mgr: &SpillManager,
        budget: &dyn MemoryBudget<Guard = BudgetGuardImpl>,
        out: &mut Vec<u8>,
    ) -> Result<bool> {
        while self.pos >= self.block.len() {
            let Some(seg) = self.meta.blocks.get(self.next_block) else {
                return Ok(false);
            };
            self.block = mgr.read_block(seg, budget)?;
            self.pos = 0;
            self.next_block += 1;
        }
        let rest = &self.block[self.pos..];
        if rest.len() < 4 {
            return Err(Error::Storage("truncated record length in run".into()));
        }
        let len = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        if rest.len() < 4 + len {
            return Err(Error::Storage("truncated record in run".into()));
        }
        out.clear();
        out.extend_from_slice(&rest[4..4 + len]);
        self.pos += 4 + len;
        Ok(true)
    }

    /// Delete the segments of this run.
    pub fn discard(self, mgr: &SpillManager) -> Result<()> {
        for seg in &self.meta.blocks {
            mgr.delete_segment(&seg.name)?;
        }
        Ok(())
    }
}
