//! Binary index format.
//!
//! An index file is a flat sequence of `(offset, length)` pairs, each encoded
//! as two little-endian 64-bit integers. There is no header and no checksum.

pub mod dynamic;
pub mod query;
pub mod size;

pub use dynamic::DynamicIdx;
pub use query::{IndexSource, PartSpec, part, range};
pub use size::SizeIndex;

use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Encoded size of one record.
pub const RECORD_SIZE: u64 = 16;

/// A half-open byte range `[offset, offset + length)` in a data file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct IndexRecord {
    pub offset: u64,
    pub length: u64,
}

impl IndexRecord {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// One past the last byte covered, saturating at `u64::MAX`.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    /// One past the last byte covered, or `None` when the range overflows.
    pub fn checked_end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }

    pub fn to_bytes(self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; 16]) -> Self {
        let mut offset = [0u8; 8];
        let mut length = [0u8; 8];
        offset.copy_from_slice(&buf[..8]);
        length.copy_from_slice(&buf[8..]);
        Self {
            offset: u64::from_le_bytes(offset),
            length: u64::from_le_bytes(length),
        }
    }
}

/// In-memory index: an ordered list of records, 1-indexed when addressed by clients.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Idx {
    records: Vec<IndexRecord>,
}

impl Idx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: IndexRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IndexRecord] {
        &self.records
    }

    /// Sum of all record lengths.
    pub fn total_size(&self) -> u64 {
        self.records.iter().map(|r| r.length).sum()
    }

    /// Write every record to `path`.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = IndexWriter::create(path)?;
        for record in &self.records {
            writer.push(*record)?;
        }
        writer.finish()?;
        Ok(())
    }

    /// Read an index file. A trailing partial record is a hard error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        Self::decode(&data).ok_or_else(|| Error::TruncatedIndex {
            path: path.to_path_buf(),
            len: data.len() as u64,
        })
    }

    /// Decode raw index bytes, `None` when the length is not a record multiple.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() % RECORD_SIZE as usize != 0 {
            return None;
        }
        let records = data
            .chunks_exact(RECORD_SIZE as usize)
            .map(|chunk| {
                let mut buf = [0u8; 16];
                buf.copy_from_slice(chunk);
                IndexRecord::from_bytes(&buf)
            })
            .collect();
        Some(Self { records })
    }
}

impl From<Vec<IndexRecord>> for Idx {
    fn from(records: Vec<IndexRecord>) -> Self {
        Self { records }
    }
}

/// Streaming index writer: records go to a temporary sibling file that is
/// renamed into place by [`IndexWriter::finish`]. Dropping an unfinished
/// writer removes the temporary file.
pub struct IndexWriter {
    writer: Option<BufWriter<File>>,
    temp_path: PathBuf,
    final_path: PathBuf,
    count: u64,
    total_size: u64,
}

impl IndexWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_name = format!(
            "{}.tmp.{}",
            final_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            Uuid::new_v4()
        );
        let temp_path = final_path.with_file_name(temp_name);
        let file = File::create(&temp_path)?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            temp_path,
            final_path,
            count: 0,
            total_size: 0,
        })
    }

    pub fn push(&mut self, record: IndexRecord) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(&record.to_bytes())?;
        }
        self.count += 1;
        self.total_size += record.length;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Flush, sync and move the file into place. Returns `(count, total_size)`.
    pub fn finish(mut self) -> Result<(u64, u64)> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&self.temp_path, &self.final_path)?;
        Ok((self.count, self.total_size))
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Idx {
        Idx::from(vec![
            IndexRecord::new(0, 10),
            IndexRecord::new(10, 0),
            IndexRecord::new(10, u64::from(u32::MAX) + 7),
        ])
    }

    #[test]
    fn test_dump_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx").join("record.idx");
        let idx = sample();
        idx.dump(&path).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), 48);
        assert_eq!(Idx::load(&path).unwrap(), idx);
    }

    #[test]
    fn test_encoding_is_little_endian_pairs() {
        let bytes = IndexRecord::new(1, 2).to_bytes();
        assert_eq!(bytes, [1, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_trailing_partial_record_is_truncated_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.idx");
        let mut data = sample().records()[0].to_bytes().to_vec();
        data.extend_from_slice(&5u64.to_le_bytes());
        fs::write(&path, &data).unwrap();

        match Idx::load(&path) {
            Err(Error::TruncatedIndex { len, .. }) => assert_eq!(len, 24),
            other => panic!("expected TruncatedIndex, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_file_is_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.idx");
        fs::write(&path, b"").unwrap();
        assert!(Idx::load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_dropped_writer_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.idx");
        {
            let mut writer = IndexWriter::create(&path).unwrap();
            writer.push(IndexRecord::new(0, 1)).unwrap();
        }
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
