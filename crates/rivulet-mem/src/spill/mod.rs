//! Spill manager for components that outgrow memory.
//!
//! Segments are opaque byte blocks written through a `Storage` backend with a
//! header and an end-to-end blake3 checksum. Sorted runs (`run`) are built
//! on top of segments. `RecordBuffer` is separate: it overflows straight to a
//! local temp file and is not routed through `Storage`.

pub mod codec;
pub mod record_buffer;
pub mod run;
pub mod segment;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rivulet_core::budget::MemoryBudget;
use rivulet_core::id::SpillId;

use crate::error::{Error, Result};
use crate::guard::BudgetGuardImpl;
use crate::tracking::PeakTracker;

pub use codec::Codec;
pub use record_buffer::RecordBuffer;
pub use run::{RunMeta, RunReader, RunWriter};
pub use segment::{SegmentHeader, SegmentMeta, SegmentName, HEADER_LEN};

/// Largest segment payload accepted on read.
const MAX_SEGMENT_BYTES: u64 = 256 * 1024 * 1024;

/// Byte storage for spill segments.
///
/// `rivulet-io` provides a local filesystem and an in-memory implementation.
pub trait Storage: Send + Sync {
    /// Write bytes to a path, creating parent directories as needed.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read exactly `len` bytes at `offset`.
    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Delete a path. Missing paths are not an error.
    fn delete(&self, path: &str) -> Result<()>;

    /// Paths under a prefix.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    fn size(&self, path: &str) -> Result<u64>;
}

/// Writes and reads the segments of one component.
///
/// Every segment written is tracked and deleted by `cleanup` or on drop.
pub struct SpillManager {
    storage: Arc<dyn Storage>,
    codec: Codec,
    root_dir: String,
    spill_id: SpillId,
    next_run: AtomicU32,
    segments: Mutex<BTreeMap<SegmentName, SegmentMeta>>,
    tracker: Option<Arc<PeakTracker>>,
}

impl SpillManager {
    pub fn new(storage: Arc<dyn Storage>, codec: Codec, root_dir: String, spill_id: SpillId) -> Self {
        Self {
            storage,
            codec,
            root_dir,
            spill_id,
            next_run: AtomicU32::new(0),
            segments: Mutex::new(BTreeMap::new()),
            tracker: None,
        }
    }

    /// Count written bytes against `tracker`.
    pub fn with_tracker(mut self, tracker: Arc<PeakTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn spill_id(&self) -> SpillId {
        self.spill_id
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    fn segments(&self) -> MutexGuard<'_, BTreeMap<SegmentName, SegmentMeta>> {
        self.segments.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Compress `payload`, checksum it and write it as one segment.
    pub fn write_block(&self, run_index: u32, block_index: u32, payload: &[u8]) -> Result<SegmentMeta> {
        let compressed = codec::compress(self.codec, payload)?;
        let header = SegmentHeader::new(self.codec, payload.len() as u64, compressed.len() as u64);
        let header_bytes = header.to_bytes();

        let mut hasher = blake3::Hasher::new();
        hasher.update(&header_bytes);
        hasher.update(&compressed);
        let checksum: [u8; 32] = hasher.finalize().into();

        let name = SegmentName::new(self.spill_id, run_index, block_index);
        let path = format!("{}/{}.seg", self.root_dir.trim_end_matches('/'), name);

        let mut full = Vec::with_capacity(HEADER_LEN + compressed.len());
        full.extend_from_slice(&header_bytes);
        full.extend_from_slice(&compressed);
        self.storage.write(&path, &full)?;

        if let Some(t) = &self.tracker {
            t.record_spill(full.len() as u64);
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(segment = %name, bytes = full.len(), codec = self.codec.name(), "spill write");

        let meta = SegmentMeta {
            name: name.clone(),
            path,
            codec: self.codec,
            uncompressed_len: header.uncompressed_len,
            compressed_len: header.compressed_len,
            checksum,
        };
        self.segments().insert(name, meta.clone());
        Ok(meta)
    }

    /// Read a segment back, verifying its checksum. Decompression is charged
    /// to `budget` while it runs.
    pub fn read_block(
        &self,
        meta: &SegmentMeta,
        budget: &dyn MemoryBudget<Guard = BudgetGuardImpl>,
    ) -> Result<Vec<u8>> {
        if meta.compressed_len > MAX_SEGMENT_BYTES || meta.uncompressed_len > MAX_SEGMENT_BYTES {
            return Err(Error::Storage(format!("segment '{}' is oversized", meta.name)));
        }
        let total = HEADER_LEN + meta.compressed_len as usize;
        let full = self.storage.read_range(&meta.path, 0, total)?;
        if full.len() != total {
            return Err(Error::Storage(format!(
                "segment '{}' truncated: expected {total} bytes, got {}",
                meta.name,
                full.len()
            )));
        }

        let computed: [u8; 32] = blake3::hash(&full).into();
        if computed != meta.checksum {
            return Err(Error::ChecksumMismatch(meta.name.to_string()));
        }

        let header = SegmentHeader::from_bytes(&full[..HEADER_LEN])?;
        header.check_against(meta)?;

        let _guard = budget
            .try_acquire(header.uncompressed_len as usize, "spill_decompress")
            .ok_or(Error::BudgetExceeded {
                tag: "spill_decompress",
                requested: header.uncompressed_len as usize,
                capacity: budget.capacity_bytes(),
                used: budget.used_bytes(),
            })?;
        let payload = codec::decompress(header.codec, &full[HEADER_LEN..])?;
        if payload.len() as u64 != header.uncompressed_len {
            return Err(Error::Codec(format!(
                "segment '{}' decompressed to {} bytes, expected {}",
                meta.name,
                payload.len(),
                header.uncompressed_len
            )));
        }
        Ok(payload)
    }

    pub fn next_run_index(&self) -> u32 {
        self.next_run.fetch_add(1, Ordering::Relaxed)
    }

    pub fn delete_segment(&self, name: &SegmentName) -> Result<()> {
        let removed = self.segments().remove(name);
        if let Some(meta) = removed {
            self.storage.delete(&meta.path)?;
        }
        Ok(())
    }

    pub fn list_segments(&self) -> Vec<SegmentName> {
        self.segments().keys().cloned().collect()
    }

    /// Delete every segment this manager still tracks.
    pub fn cleanup(&self) -> Result<()> {
        let drained: Vec<SegmentMeta> = std::mem::take(&mut *self.segments()).into_values().collect();
        let mut first_err = None;
        for meta in drained {
            if let Err(e) = self.storage.delete(&meta.path) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for SpillManager {
    fn drop(&mut self) {
        if let Err(_e) = self.cleanup() {
            #[cfg(feature = "tracing")]
            tracing::warn!(spill_id = self.spill_id.get(), error = %_e, "spill cleanup failed");
        }
    }
}
