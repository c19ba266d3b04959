//! Spill segment header and metadata.
//!
//! Layout:
//! [ magic: u32 ][ version: u16 ][ codec: u8 ][ reserved: u8 ]
//! [ uncompressed_len: u64 ][ compressed_len: u64 ]
//! [ payload bytes ... ]
//!
//! The blake3 checksum covers header and payload and is kept in `SegmentMeta`,
//! not on disk.

use serde::{Deserialize, Serialize};

use super::Codec;
use crate::error::{Error, Result};
use rivulet_core::id::SpillId;

pub const MAGIC: u32 = 0x5256_4C54; // "RVLT"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub codec: Codec,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

impl SegmentHeader {
    pub fn new(codec: Codec, uncompressed_len: u64, compressed_len: u64) -> Self {
        Self {
            codec,
            uncompressed_len,
            compressed_len,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&VERSION.to_le_bytes());
        out[6] = self.codec as u8;
        out[8..16].copy_from_slice(&self.uncompressed_len.to_le_bytes());
        out[16..24].copy_from_slice(&self.compressed_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Storage(format!(
                "segment header needs {HEADER_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if magic != MAGIC || version != VERSION {
            return Err(Error::Storage(format!(
                "bad segment magic/version {magic:#x}/{version}"
            )));
        }
        Ok(Self {
            codec: Codec::from_u8(bytes[6])?,
            uncompressed_len: le_u64(&bytes[8..16]),
            compressed_len: le_u64(&bytes[16..24]),
        })
    }

    /// Reject sizes that disagree with what the manager recorded at write time.
    pub fn check_against(&self, meta: &SegmentMeta) -> Result<()> {
        if self.uncompressed_len != meta.uncompressed_len
            || self.compressed_len != meta.compressed_len
            || self.codec != meta.codec
        {
            return Err(Error::Storage(format!(
                "segment '{}' header does not match its metadata",
                meta.name
            )));
        }
        Ok(())
    }
}

/// Segment name derived from the owning spill id, run and block index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentName(pub String);

impl SegmentName {
    pub fn new(id: SpillId, run_index: u32, block_index: u32) -> Self {
        SegmentName(format!(
            "spill{}_run{}_blk{}",
            id.get(),
            run_index,
            block_index
        ))
    }
}

impl std::fmt::Display for SegmentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub name: SegmentName,
    pub path: String,
    pub codec: Codec,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
    pub checksum: [u8; 32],
}
