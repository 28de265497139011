//! Column indexer.
//!
//! Rows are tab-delimited lines. Consecutive rows that share the value of the
//! selected column collapse into a single record spanning the whole run.

use super::{BuildOutcome, FORMAT_ARRAY};
use crate::error::{Error, Result};
use crate::format::trim_newline;
use crate::index::{IndexRecord, IndexWriter};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub fn build(data: &Path, column: usize, out: &Path) -> Result<BuildOutcome> {
    if column == 0 {
        return Err(Error::ColumnOutOfRange { row: 1, column });
    }
    let mut reader = BufReader::new(File::open(data)?);
    let mut writer = IndexWriter::create(out)?;

    let mut line = Vec::new();
    let mut offset = 0u64;
    let mut row = 0u64;
    // (value, run start, run length)
    let mut run: Option<(Vec<u8>, u64, u64)> = None;

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)? as u64;
        if n == 0 {
            break;
        }
        row += 1;
        let value = trim_newline(&line)
            .split(|b| *b == b'\t')
            .nth(column - 1)
            .ok_or(Error::ColumnOutOfRange { row, column })?;

        match run.as_mut() {
            Some((current, _, length)) if current.as_slice() == value => *length += n,
            _ => {
                if let Some((_, start, length)) = run.take() {
                    writer.push(IndexRecord::new(start, length))?;
                }
                run = Some((value.to_vec(), offset, n));
            }
        }
        offset += n;
    }
    if let Some((_, start, length)) = run {
        writer.push(IndexRecord::new(start, length))?;
    }

    let (count, total_size) = writer.finish()?;
    Ok(BuildOutcome {
        count,
        total_size,
        format: FORMAT_ARRAY,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Idx;

    fn write(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("table.tsv");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_runs_are_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let rows = ["x\tA\n", "y\tA\n", "z\tB\n", "w\tA\n", "v\tA\n", "u\tA\n"];
        let data = write(dir.path(), &rows.concat());
        let out = dir.path().join("column2.idx");

        let outcome = build(&data, 2, &out).unwrap();
        assert_eq!(outcome.count, 3);
        assert_eq!(
            Idx::load(&out).unwrap().records(),
            &[
                IndexRecord::new(0, 8),
                IndexRecord::new(8, 4),
                IndexRecord::new(12, 12)
            ]
        );
    }

    #[test]
    fn test_every_distinct_row_is_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let data = write(dir.path(), "1\ta\n2\tb\n3\tc");
        let out = dir.path().join("column1.idx");
        let outcome = build(&data, 1, &out).unwrap();
        assert_eq!(outcome.count, 3);
        assert_eq!(outcome.total_size, 11);
    }

    #[test]
    fn test_short_row_is_column_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let data = write(dir.path(), "a\tb\tc\nd\te\n");
        let out = dir.path().join("column3.idx");
        assert!(matches!(
            build(&data, 3, &out),
            Err(Error::ColumnOutOfRange { row: 2, column: 3 })
        ));
        assert!(!out.exists());
    }
}
