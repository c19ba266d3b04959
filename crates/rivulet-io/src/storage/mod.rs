//! Storage backends and selection from the engine configuration.

pub mod fs;
pub mod memory;

use std::sync::Arc;

use rivulet_core::config::EngineConfig;
use rivulet_mem::Storage;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

/// Spill directories starting with this prefix never touch the disk.
pub const MEMORY_SCHEME: &str = "memory://";

/// Backend for `config.spill_dir`.
pub fn build_storage(config: &EngineConfig) -> Arc<dyn Storage> {
    if config.spill_dir.starts_with(MEMORY_SCHEME) {
        Arc::new(MemoryStorage::new())
    } else {
        Arc::new(FsStorage::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_scheme_selects_memory_backend() {
        let cfg = EngineConfig {
            spill_dir: "memory://spill".into(),
            ..EngineConfig::default()
        };
        let storage = build_storage(&cfg);
        storage.write("memory://spill/a.seg", b"abc").expect("write");
        assert_eq!(storage.size("memory://spill/a.seg").expect("size"), 3);
        assert!(!std::path::Path::new("memory://spill/a.seg").exists());
    }
}
