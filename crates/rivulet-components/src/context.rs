//! The graph context: state shared by every component of one graph run.
//!
//! Passed explicitly to `init` and `run`; nothing in here is global.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rivulet_core::config::EngineConfig;
use rivulet_core::id::{RunId, SpillId};
use rivulet_core::key::{HashKey, RecordKey};
use rivulet_core::record::DataRecord;
use rivulet_core::schema::RecordMetadata;
use rivulet_core::value::Value;
use rivulet_mem::{Codec, MemStats, MemoryBudgetImpl, PeakTracker, RecordBuffer, SpillManager, Storage};

use crate::error::{ComponentError, Result};

const MEMORY_SCHEME: &str = "memory://";

#[derive(Debug, Clone, Copy)]
struct Sequence {
    next: i64,
    step: i64,
}

/// Keyed records shared between components, e.g. a dimension table built by
/// one phase and probed by transforms of a later one.
#[derive(Debug)]
pub struct LookupTable {
    key: RecordKey,
    rows: HashMap<HashKey, DataRecord>,
}

impl LookupTable {
    pub fn new(key: RecordKey) -> Self {
        Self {
            key,
            rows: HashMap::new(),
        }
    }

    pub fn from_records(key: RecordKey, records: impl IntoIterator<Item = DataRecord>) -> Self {
        let mut table = Self::new(key);
        for r in records {
            table.insert(r);
        }
        table
    }

    /// Insert a record under its key; a later record with the same key wins.
    /// Records whose key cannot match anything (null with unequal nulls) are
    /// ignored.
    pub fn insert(&mut self, record: DataRecord) -> bool {
        match self.key.hash_key(&record) {
            Some(k) => {
                self.rows.insert(k, record);
                true
            }
            None => false,
        }
    }

    pub fn metadata(&self) -> &Arc<RecordMetadata> {
        self.key.metadata()
    }

    pub fn get(&self, key: &HashKey) -> Option<&DataRecord> {
        self.rows.get(key)
    }

    pub fn get_values(&self, values: &[Value]) -> Option<&DataRecord> {
        self.rows.get(&HashKey::new(values.to_vec()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub struct GraphContext {
    config: EngineConfig,
    run_id: RunId,
    budget: MemoryBudgetImpl,
    peak: Arc<PeakTracker>,
    storage: Arc<dyn Storage>,
    codec: Codec,
    sequences: Mutex<HashMap<String, Sequence>>,
    lookups: RwLock<HashMap<String, Arc<LookupTable>>>,
    next_spill: AtomicU64,
}

impl GraphContext {
    pub fn new(config: EngineConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        config.validate().map_err(ComponentError::config)?;
        let codec = Codec::parse(&config.spill_codec).map_err(ComponentError::config)?;
        let peak = Arc::new(PeakTracker::new());
        let budget = MemoryBudgetImpl::with_tracker(config.mem_cap_bytes, Arc::clone(&peak));
        Ok(Self {
            config,
            run_id: RunId::random(),
            budget,
            peak,
            storage,
            codec,
            sequences: Mutex::new(HashMap::new()),
            lookups: RwLock::new(HashMap::new()),
            next_spill: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn budget(&self) -> &MemoryBudgetImpl {
        &self.budget
    }

    pub fn mem_stats(&self) -> MemStats {
        self.peak.snapshot()
    }

    /// A fresh spill manager whose segments live under this run's directory.
    pub fn spill_manager(&self, owner: &str) -> SpillManager {
        let id = SpillId::new(self.next_spill.fetch_add(1, Ordering::Relaxed));
        let root = format!(
            "{}/{}/{}",
            self.config.spill_dir.trim_end_matches('/'),
            self.run_id,
            sanitize(owner)
        );
        SpillManager::new(Arc::clone(&self.storage), self.codec, root, id)
            .with_tracker(Arc::clone(&self.peak))
    }

    /// Directory for record-buffer overflow files. A `memory://` spill
    /// directory has no disk location, so the system temp dir is used.
    pub fn temp_dir(&self) -> PathBuf {
        if self.config.spill_dir.starts_with(MEMORY_SCHEME) {
            std::env::temp_dir().join("rivulet-spill")
        } else {
            PathBuf::from(&self.config.spill_dir)
        }
    }

    pub fn record_buffer(&self) -> RecordBuffer {
        RecordBuffer::new(self.temp_dir(), self.config.record_buffer_mem_bytes)
    }

    /// Define (or redefine) a named sequence.
    pub fn define_sequence(&self, name: &str, start: i64, step: i64) {
        let mut seqs = self.sequences.lock().unwrap_or_else(|p| p.into_inner());
        seqs.insert(name.to_string(), Sequence { next: start, step });
    }

    /// Current value of the sequence, then advance it.
    pub fn next_value(&self, name: &str) -> Result<i64> {
        let mut seqs = self.sequences.lock().unwrap_or_else(|p| p.into_inner());
        let seq = seqs
            .get_mut(name)
            .ok_or_else(|| ComponentError::config(format!("unknown sequence '{name}'")))?;
        let v = seq.next;
        seq.next = seq
            .next
            .checked_add(seq.step)
            .ok_or_else(|| ComponentError::Io(format!("sequence '{name}' overflowed")))?;
        Ok(v)
    }

    pub fn register_lookup(&self, name: &str, table: LookupTable) {
        let mut tables = self.lookups.write().unwrap_or_else(|p| p.into_inner());
        tables.insert(name.to_string(), Arc::new(table));
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<LookupTable>> {
        let tables = self.lookups.read().unwrap_or_else(|p| p.into_inner());
        tables.get(name).cloned()
    }
}

fn sanitize(owner: &str) -> String {
    owner
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::schema::{DataType, FieldMetadata};
    use rivulet_io::MemoryStorage;

    fn ctx() -> GraphContext {
        let cfg = EngineConfig {
            spill_dir: "memory://test".into(),
            ..EngineConfig::default()
        };
        GraphContext::new(cfg, Arc::new(MemoryStorage::new())).expect("context")
    }

    #[test]
    fn sequences_advance_by_step() {
        let ctx = ctx();
        ctx.define_sequence("ids", 10, 5);
        assert_eq!(ctx.next_value("ids").expect("seq"), 10);
        assert_eq!(ctx.next_value("ids").expect("seq"), 15);
        assert!(ctx.next_value("missing").is_err());
    }

    #[test]
    fn lookup_tables_are_shared_by_name() {
        let ctx = ctx();
        let meta = Arc::new(RecordMetadata::new(
            "dim",
            vec![
                FieldMetadata::new("code", DataType::String),
                FieldMetadata::new("label", DataType::String),
            ],
        ));
        let key = RecordKey::parse(&meta, "code").expect("key");
        let rows = [("a", "alpha"), ("b", "beta")].into_iter().map(|(c, l)| {
            DataRecord::from_values(Arc::clone(&meta), vec![c.into(), l.into()]).expect("record")
        });
        ctx.register_lookup("dim", LookupTable::from_records(key, rows));

        let table = ctx.lookup("dim").expect("registered");
        let hit = table.get_values(&["b".into()]).expect("hit");
        assert_eq!(hit.field("label"), Some(&Value::from("beta")));
        assert!(ctx.lookup("other").is_none());
    }

    #[test]
    fn rejects_unknown_codec() {
        let cfg = EngineConfig {
            spill_codec: "snappy".into(),
            ..EngineConfig::default()
        };
        assert!(GraphContext::new(cfg, Arc::new(MemoryStorage::new())).is_err());
    }
}
