//! DEDUP: keep the first, last or only records of each key group.
//!
//! Sorted mode compares adjacent records, so it holds at most `no_dup_record`
//! records at a time. Unsorted mode remembers every key it has seen and only
//! supports `First`. Records that are not kept go to output 1 when it is
//! connected.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use rivulet_core::key::{KeyField, RecordKey};
use rivulet_core::record::DataRecord;
use rivulet_core::schema::RecordMetadata;

use crate::attrs::Attrs;
use crate::error::{ComponentError, Result};
use crate::port::{InputPort, Ports};
use crate::traits::{Component, InitContext, RunContext};

pub const TYPE: &str = "DEDUP";

const PORT_KEPT: usize = 0;
const PORT_REJECTED: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keep {
    #[default]
    First,
    Last,
    Unique,
}

impl Keep {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "f" => Ok(Keep::First),
            "last" | "l" => Ok(Keep::Last),
            "unique" | "u" => Ok(Keep::Unique),
            other => Err(ComponentError::config(format!("unknown dedup policy '{other}'"))),
        }
    }
}

pub struct Dedup {
    key: Vec<KeyField>,
    keep: Keep,
    equal_nulls: bool,
    no_dup_record: usize,
    sorted: bool,
    bound: Option<(RecordKey, Arc<RecordMetadata>)>,
}

impl Dedup {
    /// An empty key makes the whole stream one group.
    pub fn new(key: Vec<KeyField>, keep: Keep) -> Self {
        Self {
            key,
            keep,
            equal_nulls: true,
            no_dup_record: 1,
            sorted: true,
            bound: None,
        }
    }

    pub fn from_attrs(attrs: &Attrs<'_>) -> Result<Self> {
        let keep = match attrs.str("keep")? {
            Some(s) => Keep::parse(s)?,
            None => Keep::First,
        };
        Ok(Self::new(attrs.key("key")?.unwrap_or_default(), keep)
            .equal_nulls(attrs.bool("equal_nulls", true)?)
            .no_dup_record(attrs.usize("no_dup_record", 1)?)
            .sorted(attrs.bool("sorted", true)?))
    }

    pub fn equal_nulls(mut self, equal_nulls: bool) -> Self {
        self.equal_nulls = equal_nulls;
        self
    }

    /// How many records of a group `First`/`Last` keep.
    pub fn no_dup_record(mut self, n: usize) -> Self {
        self.no_dup_record = n;
        self
    }

    pub fn sorted(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }
}

fn reject(ports: &mut Ports, bytes: &[u8]) -> Result<()> {
    if ports.has_output(PORT_REJECTED) {
        ports.output(PORT_REJECTED)?.write_direct(bytes)?;
    }
    Ok(())
}

fn keep(ports: &mut Ports, bytes: &[u8]) -> Result<()> {
    ports.output(PORT_KEPT)?.write_direct(bytes)
}

/// Per-group state of the sorted mode.
struct Group {
    policy: Keep,
    limit: usize,
    count: usize,
    held: VecDeque<Vec<u8>>,
}

impl Group {
    fn new(policy: Keep, limit: usize) -> Self {
        Self {
            policy,
            limit,
            count: 0,
            held: VecDeque::new(),
        }
    }

    fn add(&mut self, bytes: &[u8], ports: &mut Ports) -> Result<()> {
        self.count += 1;
        match self.policy {
            Keep::First if self.count <= self.limit => keep(ports, bytes),
            Keep::First => reject(ports, bytes),
            Keep::Last => {
                if self.held.len() == self.limit {
                    if let Some(old) = self.held.pop_front() {
                        reject(ports, &old)?;
                    }
                }
                self.held.push_back(bytes.to_vec());
                Ok(())
            }
            Keep::Unique => match self.count {
                1 => {
                    self.held.push_back(bytes.to_vec());
                    Ok(())
                }
                2 => {
                    if let Some(first) = self.held.pop_front() {
                        reject(ports, &first)?;
                    }
                    reject(ports, bytes)
                }
                _ => reject(ports, bytes),
            },
        }
    }

    /// Close the group: flush what `Last`/`Unique` were holding back.
    fn close(&mut self, ports: &mut Ports) -> Result<()> {
        for bytes in self.held.drain(..) {
            keep(ports, &bytes)?;
        }
        self.count = 0;
        Ok(())
    }
}

impl Component for Dedup {
    fn type_tag(&self) -> &'static str {
        TYPE
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> Result<()> {
        ctx.require_inputs(1, Some(1))?;
        ctx.require_outputs(1, Some(2))?;
        let meta = ctx.input(0)?;
        ctx.require_outputs_compatible(meta)?;
        if self.no_dup_record == 0 {
            return Err(ComponentError::config("no_dup_record must be at least 1"));
        }
        if !self.sorted && self.keep != Keep::First {
            return Err(ComponentError::config(format!(
                "unsorted dedup supports only keep=first, not {:?}",
                self.keep
            )));
        }
        let key = RecordKey::new(meta, &self.key)
            .map_err(ComponentError::config)?
            .with_equal_nulls(self.equal_nulls);
        self.bound = Some((key, Arc::clone(meta)));
        Ok(())
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> Result<()> {
        let (key, meta) = self
            .bound
            .clone()
            .ok_or_else(|| ComponentError::fatal("run before init"))?;
        let input = ports.take_input(0)?;
        if self.sorted {
            self.run_sorted(input, key, meta, ports, ctx)
        } else {
            self.run_unsorted(input, key, meta, ports, ctx)
        }
    }
}

impl Dedup {
    fn run_sorted(
        &self,
        mut input: InputPort,
        key: RecordKey,
        meta: Arc<RecordMetadata>,
        ports: &mut Ports,
        ctx: &RunContext,
    ) -> Result<()> {
        let mut prev = DataRecord::new(Arc::clone(&meta));
        let mut cur = DataRecord::new(meta);
        let mut bytes = Vec::new();
        let mut group = Group::new(self.keep, self.no_dup_record);
        let mut first = true;

        while input.read_direct(&mut bytes)? {
            ctx.checkpoint()?;
            cur.deserialize_from(&bytes)?;
            if !first {
                match key.compare(&prev, &cur) {
                    Ordering::Equal => {}
                    Ordering::Less => group.close(ports)?,
                    Ordering::Greater => {
                        return Err(ComponentError::OutOfOrder(format!(
                            "Input record out of order! '{}' follows '{}'",
                            key.key_string(&cur),
                            key.key_string(&prev)
                        )));
                    }
                }
            }
            first = false;
            group.add(&bytes, ports)?;
            std::mem::swap(&mut prev, &mut cur);
        }
        // the last group has no key change to close it
        group.close(ports)
    }

    fn run_unsorted(
        &self,
        mut input: InputPort,
        key: RecordKey,
        meta: Arc<RecordMetadata>,
        ports: &mut Ports,
        ctx: &RunContext,
    ) -> Result<()> {
        let mut seen = IndexMap::with_capacity(ctx.graph.config().hash_table_initial_capacity);
        let mut rec = DataRecord::new(meta);
        let mut bytes = Vec::new();
        while input.read_direct(&mut bytes)? {
            ctx.checkpoint()?;
            rec.deserialize_from(&bytes)?;
            let Some(k) = key.hash_key(&rec) else {
                // a null key with unequal nulls is never a duplicate
                keep(ports, &bytes)?;
                continue;
            };
            let count = seen.entry(k).or_insert(0usize);
            *count += 1;
            if *count <= self.no_dup_record {
                keep(ports, &bytes)?;
            } else {
                reject(ports, &bytes)?;
            }
        }
        tracing::debug!(groups = seen.len(), "unsorted dedup finished");
        Ok(())
    }
}
