//! Chunk-record indexer: record-aligned chunks near a target size.

use super::{BuildOutcome, FORMAT_ARRAY};
use crate::error::Result;
use crate::format::SequenceReader;
use crate::index::{IndexRecord, IndexWriter};
use std::path::Path;

/// Walk `reader` with `seek_chunk`, closing one chunk per boundary. The last
/// chunk ends at `size`.
pub fn build(
    reader: &mut dyn SequenceReader,
    size: u64,
    chunk_size: u64,
    out: &Path,
) -> Result<BuildOutcome> {
    let mut writer = IndexWriter::create(out)?;
    let mut offset = 0u64;
    while offset < size {
        let boundary = reader.seek_chunk(offset, chunk_size)?.clamp(offset + 1, size);
        writer.push(IndexRecord::new(offset, boundary - offset))?;
        offset = boundary;
    }
    let (count, total_size) = writer.finish()?;
    Ok(BuildOutcome {
        count,
        total_size,
        format: FORMAT_ARRAY,
    })
}
