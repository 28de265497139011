//! File-backed index reader.
//!
//! Reads only the 16-byte records a query touches, at byte offset
//! `(n - 1) * 16`, instead of materializing the whole index.

use super::{IndexRecord, RECORD_SIZE, query::IndexSource};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

pub struct DynamicIdx {
    file: File,
    path: PathBuf,
    len: u64,
}

impl DynamicIdx {
    /// Open an index file. Fails with `TruncatedIndex` if its size is not a
    /// multiple of the record size.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let bytes = file.metadata()?.len();
        if bytes % RECORD_SIZE != 0 {
            return Err(Error::TruncatedIndex { path, len: bytes });
        }
        Ok(Self {
            file,
            path,
            len: bytes / RECORD_SIZE,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn count(&self) -> u64 {
        self.len
    }

    fn read_at(&self, position: u64, count: u64) -> Result<Vec<u8>> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start((position - 1) * RECORD_SIZE))?;
        let mut buf = vec![0u8; (count * RECORD_SIZE) as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl IndexSource for DynamicIdx {
    fn len(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn record(&self, position: u64) -> Result<IndexRecord> {
        if position == 0 || position > self.len {
            return Err(Error::IndexOutOfBounds {
                position,
                len: self.len,
            });
        }
        let buf = self.read_at(position, 1)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&buf);
        Ok(IndexRecord::from_bytes(&raw))
    }

    fn records(&self, start: u64, end: u64) -> Result<Vec<IndexRecord>> {
        if start == 0 || start > end || end > self.len {
            return Err(Error::IndexOutOfBounds {
                position: end,
                len: self.len,
            });
        }
        let buf = self.read_at(start, end - start + 1)?;
        Ok(buf
            .chunks_exact(RECORD_SIZE as usize)
            .map(|chunk| {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(chunk);
                IndexRecord::from_bytes(&raw)
            })
            .collect())
    }
}
