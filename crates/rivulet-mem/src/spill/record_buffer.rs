//! FIFO buffer of serialized records that overflows to a temp file.
//!
//! Holds the slave key groups of the merge join. The buffer is rewound and
//! read as often as needed; pushing after a read appends at the end.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

enum FileState {
    Writing(BufWriter<File>),
    Reading(BufReader<File>),
}

pub struct RecordBuffer {
    dir: PathBuf,
    mem_limit: usize,
    mem: Vec<Vec<u8>>,
    mem_bytes: usize,
    file: Option<FileState>,
    file_records: usize,
    read_pos: usize,
}

impl RecordBuffer {
    pub fn new(dir: impl AsRef<Path>, mem_limit: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            mem_limit,
            mem: Vec::new(),
            mem_bytes: 0,
            file: None,
            file_records: 0,
            read_pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.mem.len() + self.file_records
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any record currently lives on disk.
    pub fn spilled(&self) -> bool {
        self.file_records > 0
    }

    pub fn push(&mut self, record: &[u8]) -> Result<()> {
        if self.file_records == 0 && self.mem_bytes + record.len() <= self.mem_limit {
            self.mem_bytes += record.len();
            self.mem.push(record.to_vec());
            return Ok(());
        }
        let w = self.writer()?;
        let len = record.len() as u32;
        w.write_all(&len.to_le_bytes())?;
        w.write_all(record)?;
        self.file_records += 1;
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        let state = match self.file.take() {
            Some(FileState::Writing(w)) => FileState::Writing(w),
            Some(FileState::Reading(r)) => {
                let mut f = r.into_inner();
                f.seek(SeekFrom::End(0))?;
                FileState::Writing(BufWriter::new(f))
            }
            None => {
                std::fs::create_dir_all(&self.dir)?;
                let f = tempfile::tempfile_in(&self.dir)?;
                FileState::Writing(BufWriter::new(f))
            }
        };
        match self.file.insert(state) {
            FileState::Writing(w) => Ok(w),
            FileState::Reading(_) => Err(Error::Storage("record buffer not writable".into())),
        }
    }

    /// Start reading again from the first record.
    pub fn rewind(&mut self) -> Result<()> {
        self.read_pos = 0;
        let state = match self.file.take() {
            None => return Ok(()),
            Some(FileState::Writing(w)) => w.into_inner().map_err(|e| e.into_error())?,
            Some(FileState::Reading(r)) => r.into_inner(),
        };
        let mut f = state;
        f.seek(SeekFrom::Start(0))?;
        self.file = Some(FileState::Reading(BufReader::new(f)));
        Ok(())
    }

    /// Copy the next record into `out`. `Ok(false)` after the last one.
    pub fn next_into(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        if self.read_pos < self.mem.len() {
            out.clear();
            out.extend_from_slice(&self.mem[self.read_pos]);
            self.read_pos += 1;
            return Ok(true);
        }
        if self.read_pos >= self.len() {
            return Ok(false);
        }
        if let Some(FileState::Writing(_)) = self.file {
            // the file cursor has to be at the first unread record
            let skip = self.read_pos - self.mem.len();
            self.rewind()?;
            self.read_pos = self.mem.len();
            for _ in 0..skip {
                self.read_file_record(out)?;
                self.read_pos += 1;
            }
        }
        self.read_file_record(out)?;
        self.read_pos += 1;
        Ok(true)
    }

    fn read_file_record(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let Some(FileState::Reading(r)) = self.file.as_mut() else {
            return Err(Error::Storage("record buffer not readable".into()));
        };
        let mut len = [0u8; 4];
        r.read_exact(&mut len)?;
        out.resize(u32::from_le_bytes(len) as usize, 0);
        r.read_exact(out)?;
        Ok(())
    }

    /// Drop every record. The overflow file is truncated and kept for reuse.
    pub fn clear(&mut self) -> Result<()> {
        self.mem.clear();
        self.mem_bytes = 0;
        self.read_pos = 0;
        if let Some(state) = self.file.take() {
            let f = match state {
                FileState::Writing(w) => w.into_inner().map_err(|e| e.into_error())?,
                FileState::Reading(r) => r.into_inner(),
            };
            f.set_len(0)?;
            let mut f = f;
            f.seek(SeekFrom::Start(0))?;
            self.file = Some(FileState::Writing(BufWriter::new(f)));
        }
        self.file_records = 0;
        Ok(())
    }
}
