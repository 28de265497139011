//! Subset indexer.
//!
//! Projects a parent index through a newline-delimited list of strictly
//! increasing 1-based positions. The plain output copies each selected parent
//! record verbatim; the optional compressed output merges neighbours that
//! touch, the same run compression the column indexer applies.

use super::{BuildOutcome, FORMAT_ARRAY};
use crate::error::{Error, Result};
use crate::index::{IndexRecord, IndexSource, IndexWriter};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubsetOutcome {
    /// Uncompressed index.
    pub index: BuildOutcome,
    /// Record count of the compressed companion, when one was written.
    pub compressed_count: Option<u64>,
}

/// Parse the id list, enforcing strict ordering and parent bounds.
pub fn parse_ids(ids: &Path, parent_len: u64) -> Result<Vec<u64>> {
    let reader = BufReader::new(File::open(ids)?);
    let mut out = Vec::new();
    let mut previous = 0u64;
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: u64 = trimmed
            .parse()
            .map_err(|_| Error::InvalidSubsetList(trimmed.to_string()))?;
        if value <= previous {
            return Err(Error::UnsortedOrDuplicate { previous, value });
        }
        if value > parent_len {
            return Err(Error::ParentIndexOutOfRange {
                value,
                len: parent_len,
            });
        }
        out.push(value);
        previous = value;
    }
    Ok(out)
}

pub fn build<S: IndexSource + ?Sized>(
    ids: &Path,
    parent: &S,
    out: &Path,
    compressed: Option<&Path>,
) -> Result<SubsetOutcome> {
    let positions = parse_ids(ids, parent.len()?)?;

    let mut writer = IndexWriter::create(out)?;
    let mut compressed_writer = compressed.map(IndexWriter::create).transpose()?;
    let mut pending: Option<IndexRecord> = None;

    for position in positions {
        let record = parent.record(position)?;
        writer.push(record)?;
        if let Some(cw) = compressed_writer.as_mut() {
            match pending.as_mut() {
                Some(prev)
                    if prev.checked_end() == Some(record.offset)
                        && record.checked_end().is_some() =>
                {
                    prev.length += record.length
                }
                _ => {
                    if let Some(prev) = pending.replace(record) {
                        cw.push(prev)?;
                    }
                }
            }
        }
    }

    let compressed_count = match compressed_writer {
        Some(mut cw) => {
            if let Some(prev) = pending {
                cw.push(prev)?;
            }
            Some(cw.finish()?.0)
        }
        None => None,
    };
    let (count, total_size) = writer.finish()?;
    Ok(SubsetOutcome {
        index: BuildOutcome {
            count,
            total_size,
            format: FORMAT_ARRAY,
        },
        compressed_count,
    })
}
