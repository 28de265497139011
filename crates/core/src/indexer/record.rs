//! Record indexer: one entry per raw record, contiguous by construction.

use super::{BuildOutcome, FORMAT_ARRAY};
use crate::error::Result;
use crate::format::SequenceReader;
use crate::index::{IndexRecord, IndexWriter};
use std::path::Path;

pub fn build(reader: &mut dyn SequenceReader, out: &Path) -> Result<BuildOutcome> {
    let mut writer = IndexWriter::create(out)?;
    let mut buf = Vec::new();
    let mut offset = 0u64;
    loop {
        buf.clear();
        let n = reader.read_raw(&mut buf)? as u64;
        if n == 0 {
            break;
        }
        writer.push(IndexRecord::new(offset, n))?;
        offset += n;
    }
    let (count, total_size) = writer.finish()?;
    Ok(BuildOutcome {
        count,
        total_size,
        format: FORMAT_ARRAY,
    })
}
