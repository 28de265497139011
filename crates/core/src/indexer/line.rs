use super::BuildOutcome;
use crate::error::Result;
use crate::format::LineReader;
use std::fs::File;
use std::path::Path;

/// Line indexer: the record indexer driven by a [`LineReader`].
pub fn build(data: &Path, out: &Path) -> Result<BuildOutcome> {
    let mut reader = LineReader::new(File::open(data)?)?;
    super::record::build(&mut reader, out)
}
