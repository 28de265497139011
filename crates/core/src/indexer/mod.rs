//! Indexer engines.
//!
//! Each engine reads a data file and writes a binary index through
//! [`IndexWriter`](crate::index::IndexWriter), so a failed build never leaves
//! a partial index at the output path.

pub mod chunkrecord;
pub mod column;
pub mod line;
pub mod record;
pub mod subset;

use crate::error::{Error, Result};
use crate::index::{DynamicIdx, SizeIndex};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Storage format of a persisted index: a flat array of 16-byte records.
pub const FORMAT_ARRAY: &str = "array";

/// Storage format of an index computed on demand.
pub const FORMAT_DYNAMIC: &str = "dynamic";

/// Index names that cannot be used for user-named subset indexes.
pub const RESERVED_NAMES: [&str; 5] = ["record", "chunkrecord", "line", "size", "bai"];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name) || name.starts_with("column")
}

/// What to build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexKind {
    /// One entry per sequence record.
    Record,
    /// Record-aligned chunks of roughly `chunk_size` bytes.
    ChunkRecord { chunk_size: u64 },
    /// One entry per line.
    Line,
    /// One entry per run of rows sharing the value of a 1-indexed column.
    Column { column: usize },
    /// Projection of a parent index through a sorted id list.
    Subset {
        parent_index: PathBuf,
        ids: PathBuf,
        compressed: Option<PathBuf>,
    },
    /// Fixed-size chunks computed from the file size; nothing is written.
    Size { chunk_size: u64 },
    /// BAM index produced by an external `samtools`.
    Bai { samtools: PathBuf },
}

impl IndexKind {
    /// Catalog name for kinds with a fixed name; `None` for subsets, which
    /// are named by the caller.
    pub fn name(&self) -> Option<String> {
        match self {
            Self::Record => Some("record".into()),
            Self::ChunkRecord { .. } => Some("chunkrecord".into()),
            Self::Line => Some("line".into()),
            Self::Column { column } => Some(format!("column{column}")),
            Self::Subset { .. } => None,
            Self::Size { .. } => Some("size".into()),
            Self::Bai { .. } => Some("bai".into()),
        }
    }

    /// Catalog `type` recorded on the `IdxInfo`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::ChunkRecord { .. } => "chunkrecord",
            Self::Line => "line",
            Self::Column { .. } => "column",
            Self::Subset { .. } => "subset",
            Self::Size { .. } => "size",
            Self::Bai { .. } => "bai",
        }
    }
}

/// Result of a build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildOutcome {
    pub count: u64,
    pub total_size: u64,
    pub format: &'static str,
}

impl BuildOutcome {
    /// Mean record length, zero for an empty index.
    pub fn avg_unit_size(&self) -> u64 {
        self.total_size.checked_div(self.count).unwrap_or(0)
    }
}

/// Build `kind` over `data`, writing the index to `out`.
pub fn build(kind: &IndexKind, data: &Path, out: &Path) -> Result<BuildOutcome> {
    debug!(kind = kind.type_name(), data = %data.display(), "building index");
    match kind {
        IndexKind::Record => {
            let mut reader = crate::format::open(data)?;
            record::build(reader.as_mut(), out)
        }
        IndexKind::ChunkRecord { chunk_size } => {
            let size = std::fs::metadata(data)?.len();
            let mut reader = crate::format::open(data)?;
            chunkrecord::build(reader.as_mut(), size, *chunk_size, out)
        }
        IndexKind::Line => line::build(data, out),
        IndexKind::Column { column } => column::build(data, *column, out),
        IndexKind::Subset {
            parent_index,
            ids,
            compressed,
        } => {
            let parent = DynamicIdx::open(parent_index)?;
            let outcome = subset::build(ids, &parent, out, compressed.as_deref())?;
            Ok(outcome.index)
        }
        IndexKind::Size { chunk_size } => {
            let size = std::fs::metadata(data)?.len();
            let index = SizeIndex::new(*chunk_size, size);
            Ok(BuildOutcome {
                count: index.units(),
                total_size: size,
                format: FORMAT_DYNAMIC,
            })
        }
        IndexKind::Bai { samtools } => build_bai(samtools, data, out),
    }
}

fn build_bai(samtools: &Path, data: &Path, out: &Path) -> Result<BuildOutcome> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let output = Command::new(samtools)
        .arg("index")
        .arg(data)
        .arg(out)
        .output()
        .map_err(|e| Error::ExternalTool(format!("{}: {e}", samtools.display())))?;
    if !output.status.success() {
        let _ = std::fs::remove_file(out);
        return Err(Error::ExternalTool(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(BuildOutcome {
        count: 1,
        total_size: std::fs::metadata(data)?.len(),
        format: "bai",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Idx;

    #[test]
    fn test_reserved_names() {
        for name in ["record", "chunkrecord", "line", "size", "bai", "column3"] {
            assert!(is_reserved(name), "{name}");
        }
        assert!(!is_reserved("my_subset"));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(IndexKind::Column { column: 2 }.name().as_deref(), Some("column2"));
        assert_eq!(IndexKind::Column { column: 2 }.type_name(), "column");
        assert_eq!(
            IndexKind::Subset {
                parent_index: PathBuf::new(),
                ids: PathBuf::new(),
                compressed: None
            }
            .name(),
            None
        );
    }

    #[test]
    fn test_build_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("reads.fa");
        std::fs::write(&data, b">a\nACGT\n>b\nGG\n>c\nTTTT\n").unwrap();

        let out = dir.path().join("idx").join("record.idx");
        let outcome = build(&IndexKind::Record, &data, &out).unwrap();
        assert_eq!(outcome.count, 3);
        assert_eq!(outcome.total_size, 22);
        assert_eq!(outcome.format, FORMAT_ARRAY);
        assert_eq!(Idx::load(&out).unwrap().len(), 3);

        let size = build(&IndexKind::Size { chunk_size: 10 }, &data, &dir.path().join("unused")).unwrap();
        assert_eq!(size.count, 3);
        assert!(!dir.path().join("unused").exists());
    }

    #[test]
    fn test_unrecognized_data_fails_record_build() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("notes.txt");
        std::fs::write(&data, b"plain words\n").unwrap();
        let out = dir.path().join("record.idx");
        assert!(matches!(
            build(&IndexKind::Record, &data, &out),
            Err(Error::UnrecognizedFormat)
        ));
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_samtools_is_external_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("reads.bam");
        std::fs::write(&data, b"BAM").unwrap();
        let kind = IndexKind::Bai {
            samtools: dir.path().join("no-such-samtools"),
        };
        assert!(matches!(
            build(&kind, &data, &dir.path().join("bai.idx")),
            Err(Error::ExternalTool(_))
        ));
    }
}
