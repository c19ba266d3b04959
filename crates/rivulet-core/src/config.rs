//! Engine configuration shared by the graph and every component.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default serialized-record capacity in bytes.
pub const DEFAULT_MAX_RECORD_SIZE: usize = 8192;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Memory budget (bytes) shared by sorters and in-memory buffers.
    pub mem_cap_bytes: usize,

    /// Largest serialized record an edge or buffer accepts.
    pub max_record_size: usize,

    /// Packets an edge holds before its writer blocks.
    pub edge_capacity: usize,

    /// Slice (ms) of a blocking port wait between cancellation checks.
    pub poll_interval_ms: u64,

    /// Directory for spill segments and record-buffer overflow files.
    pub spill_dir: String,

    /// Spill segment compression: `none`, `zstd` or `lz4`.
    pub spill_codec: String,

    /// Bytes a record buffer keeps in memory before overflowing to a temp file.
    pub record_buffer_mem_bytes: usize,

    /// Records a sorter holds in memory before writing a sorted run.
    pub sort_buffer_records: usize,

    /// Most runs merged in a single pass.
    pub sort_merge_fan_in: usize,

    /// Target payload size of one spill segment.
    pub spill_block_bytes: usize,

    pub hash_table_initial_capacity: usize,

    pub aggregate_group_initial_capacity: usize,

    /// Send EOF on the outputs of a component that failed fatally.
    pub close_ports_on_fatal: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mem_cap_bytes: 512 * 1024 * 1024, // 512 MiB default
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            edge_capacity: 256,
            poll_interval_ms: 50,
            spill_dir: std::env::temp_dir()
                .join("rivulet-spill")
                .to_string_lossy()
                .into_owned(),
            spill_codec: "none".to_string(),
            record_buffer_mem_bytes: 64 * 1024,
            sort_buffer_records: 10_000,
            sort_merge_fan_in: 64,
            spill_block_bytes: 256 * 1024,
            hash_table_initial_capacity: 512,
            aggregate_group_initial_capacity: 512,
            close_ports_on_fatal: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, slot: &mut T) {
    if let Ok(s) = std::env::var(name) {
        if let Ok(v) = s.parse::<T>() {
            *slot = v;
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `RIVULET_MEM_CAP_BYTES`: memory cap in bytes
    /// - `RIVULET_MAX_RECORD_SIZE`: serialized record capacity
    /// - `RIVULET_EDGE_CAPACITY`: bounded edge capacity
    /// - `RIVULET_POLL_INTERVAL_MS`: port wait slice
    /// - `RIVULET_SPILL_DIR`: spill directory
    /// - `RIVULET_SPILL_CODEC`: `none` / `zstd` / `lz4`
    /// - `RIVULET_RECORD_BUFFER_MEM_BYTES`: record buffer in-memory prefix
    /// - `RIVULET_SORT_BUFFER_RECORDS`: in-memory sort capacity
    /// - `RIVULET_SORT_MERGE_FAN_IN`: merge fan-in
    /// - `RIVULET_SPILL_BLOCK_BYTES`: spill segment size
    /// - `RIVULET_HASH_TABLE_INITIAL_CAPACITY`
    /// - `RIVULET_AGGREGATE_GROUP_INITIAL_CAPACITY`
    /// - `RIVULET_CLOSE_PORTS_ON_FATAL`: `true` / `false`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        env_parse("RIVULET_MEM_CAP_BYTES", &mut cfg.mem_cap_bytes);
        env_parse("RIVULET_MAX_RECORD_SIZE", &mut cfg.max_record_size);
        env_parse("RIVULET_EDGE_CAPACITY", &mut cfg.edge_capacity);
        env_parse("RIVULET_POLL_INTERVAL_MS", &mut cfg.poll_interval_ms);

        if let Ok(s) = std::env::var("RIVULET_SPILL_DIR") {
            cfg.spill_dir = s;
        }

        if let Ok(s) = std::env::var("RIVULET_SPILL_CODEC") {
            cfg.spill_codec = s;
        }

        env_parse(
            "RIVULET_RECORD_BUFFER_MEM_BYTES",
            &mut cfg.record_buffer_mem_bytes,
        );
        env_parse("RIVULET_SORT_BUFFER_RECORDS", &mut cfg.sort_buffer_records);
        env_parse("RIVULET_SORT_MERGE_FAN_IN", &mut cfg.sort_merge_fan_in);
        env_parse("RIVULET_SPILL_BLOCK_BYTES", &mut cfg.spill_block_bytes);
        env_parse(
            "RIVULET_HASH_TABLE_INITIAL_CAPACITY",
            &mut cfg.hash_table_initial_capacity,
        );
        env_parse(
            "RIVULET_AGGREGATE_GROUP_INITIAL_CAPACITY",
            &mut cfg.aggregate_group_initial_capacity,
        );
        env_parse("RIVULET_CLOSE_PORTS_ON_FATAL", &mut cfg.close_ports_on_fatal);

        cfg
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_record_size == 0 {
            return Err(Error::Config("max_record_size must be positive".into()));
        }
        if self.edge_capacity == 0 {
            return Err(Error::Config("edge_capacity must be positive".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        if self.sort_buffer_records == 0 {
            return Err(Error::Config("sort_buffer_records must be positive".into()));
        }
        if self.sort_merge_fan_in < 2 {
            return Err(Error::Config("sort_merge_fan_in must be at least 2".into()));
        }
        if !matches!(self.spill_codec.as_str(), "none" | "zstd" | "lz4") {
            return Err(Error::Config(format!(
                "unknown spill codec '{}'",
                self.spill_codec
            )));
        }
        Ok(())
    }
}
