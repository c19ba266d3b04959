//! COLLECT: a sink that keeps every record it reads in a shared handle.

use std::sync::{Arc, Mutex, MutexGuard};

use rivulet_core::record::DataRecord;

use crate::error::Result;
use crate::port::{read_any, Ports};
use crate::traits::{Component, InitContext, RunContext};

pub const TYPE: &str = "COLLECT";

/// Shared view of what a `Collect` sink received, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct CollectHandle {
    records: Arc<Mutex<Vec<DataRecord>>>,
}

impl CollectHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DataRecord>> {
        // a panicking writer leaves a valid Vec behind
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn records(&self) -> Vec<DataRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn take(&self) -> Vec<DataRecord> {
        std::mem::take(&mut *self.lock())
    }
}

#[derive(Debug, Default)]
pub struct Collect {
    handle: CollectHandle,
}

impl Collect {
    pub fn new(handle: CollectHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> CollectHandle {
        self.handle.clone()
    }
}

impl Component for Collect {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_inputs(1, None)?;
        ctx.require_outputs(0, Some(0))
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let mut inputs = ports.take_inputs();
        let metas: Vec<_> = inputs.iter().map(|p| Arc::clone(p.metadata())).collect();
        let mut bytes = Vec::new();
        while let Some(i) = read_any(&mut inputs, &mut bytes)? {
            ctx.checkpoint()?;
            let mut rec = DataRecord::new(Arc::clone(&metas[i]));
            rec.deserialize_from(&bytes)?;
            self.handle.lock().push(rec);
        }
        Ok(())
    }
}
