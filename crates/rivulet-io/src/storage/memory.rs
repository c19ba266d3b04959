//! Map-backed storage for tests and `memory://` spill directories.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rivulet_mem::error::{Error as MemError, Result as MemResult};
use rivulet_mem::Storage;

#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MemResult<MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|_| MemError::Storage("memory storage lock poisoned".into()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.data().map(|d| d.contains_key(path)).unwrap_or(false)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.data().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flip one byte of a stored object. Lets tests exercise checksum failures.
    pub fn corrupt(&self, path: &str, offset: usize) -> bool {
        match self.data() {
            Ok(mut d) => match d.get_mut(path).and_then(|b| b.get_mut(offset)) {
                Some(byte) => {
                    *byte ^= 0xff;
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }
}

impl Storage for MemoryStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> MemResult<()> {
        self.data()?.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> MemResult<Vec<u8>> {
        let data = self.data()?;
        let bytes = data
            .get(path)
            .ok_or_else(|| MemError::Storage(format!("path not found: {path}")))?;
        let start = offset as usize;
        let end = start.saturating_add(len);
        if end > bytes.len() {
            return Err(MemError::Storage(format!(
                "range {start}..{end} exceeds size {} of '{path}'",
                bytes.len()
            )));
        }
        Ok(bytes[start..end].to_vec())
    }

    fn delete(&self, path: &str) -> MemResult<()> {
        self.data()?.remove(path);
        Ok(())
    }

    fn list(&self, prefix: &str) -> MemResult<Vec<String>> {
        Ok(self
            .data()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn size(&self, path: &str) -> MemResult<u64> {
        self.data()?
            .get(path)
            .map(|b| b.len() as u64)
            .ok_or_else(|| MemError::Storage(format!("path not found: {path}")))
    }
}
