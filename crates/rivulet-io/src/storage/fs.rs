use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use rivulet_mem::error::{Error as MemError, Result as MemResult};
use rivulet_mem::Storage;

/// Local filesystem storage. Paths are used as given.
#[derive(Debug, Clone, Default)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }
}

fn storage_err(op: &str, path: &str, e: std::io::Error) -> MemError {
    MemError::Storage(format!("{op} '{path}': {e}"))
}

impl Storage for FsStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> MemResult<()> {
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).map_err(|e| storage_err("mkdir", path, e))?;
        }
        let mut f = File::create(p).map_err(|e| storage_err("create", path, e))?;
        f.write_all(bytes).map_err(|e| storage_err("write", path, e))?;
        f.flush().map_err(|e| storage_err("flush", path, e))
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> MemResult<Vec<u8>> {
        let mut f = File::open(path).map_err(|e| storage_err("open", path, e))?;
        f.seek(SeekFrom::Start(offset))
            .map_err(|e| storage_err("seek", path, e))?;
        let mut buf = vec![0u8; len];
        f.read_exact(&mut buf)
            .map_err(|e| storage_err("read", path, e))?;
        Ok(buf)
    }

    fn delete(&self, path: &str) -> MemResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err("delete", path, e)),
        }
    }

    fn list(&self, prefix: &str) -> MemResult<Vec<String>> {
        let root = Path::new(prefix);
        let mut out = Vec::new();
        if root.is_file() {
            out.push(prefix.to_string());
            return Ok(out);
        }
        if !root.is_dir() {
            return Ok(out);
        }
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let entries = fs::read_dir(&dir).map_err(|e| storage_err("list", prefix, e))?;
            for entry in entries {
                let path = entry.map_err(|e| storage_err("list", prefix, e))?.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Some(s) = path.to_str() {
                    out.push(s.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn size(&self, path: &str) -> MemResult<u64> {
        fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| storage_err("stat", path, e))
    }
}
