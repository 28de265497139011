//! Format auto-detection.

use super::{DETECT_SIZE, FastaReader, FastqReader, Format, LineReader, SamReader, SequenceReader};
use crate::error::{Error, Result};
use regex::bytes::Regex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::LazyLock;

static FASTA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A[\r\n]*>[^\r\n]*\r?\n[^>\r\n]").expect("fasta detection regex")
});

static FASTQ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A[\r\n]*@[^\r\n]*\r?\n[^\r\n]*\r?\n\+[^\r\n]*\r?\n").expect("fastq detection regex")
});

static SAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(?:^@[A-Z][A-Z]\t)|(?:^(?:[^\t\r\n]*\t){10,}[^\t\r\n]*\r?$)")
        .expect("sam detection regex")
});

/// Classify a leading sample of a file. Formats are tried in the order
/// FASTA, FASTQ, SAM and the first match wins.
pub fn detect_bytes(sample: &[u8]) -> Result<Format> {
    let candidates: [(Format, &Regex); 3] = [
        (Format::Fasta, &FASTA_RE),
        (Format::Fastq, &FASTQ_RE),
        (Format::Sam, &SAM_RE),
    ];
    candidates
        .iter()
        .find(|(_, re)| re.is_match(sample))
        .map(|(format, _)| *format)
        .ok_or(Error::UnrecognizedFormat)
}

/// Classify a seekable input by its first [`DETECT_SIZE`] bytes and rewind it.
pub fn detect<R: Read + Seek>(input: &mut R) -> Result<Format> {
    let mut sample = Vec::with_capacity(DETECT_SIZE);
    input.by_ref().take(DETECT_SIZE as u64).read_to_end(&mut sample)?;
    input.seek(SeekFrom::Start(0))?;
    detect_bytes(&sample)
}

/// Build a reader for `format` over `input`.
pub fn reader_for<R: Read + Seek + 'static>(
    format: Format,
    input: R,
) -> Result<Box<dyn SequenceReader>> {
    Ok(match format {
        Format::Fasta => Box::new(FastaReader::new(input)?),
        Format::Fastq => Box::new(FastqReader::new(input)?),
        Format::Sam => Box::new(SamReader::new(input)?),
        Format::Line => Box::new(LineReader::new(input)?),
    })
}

/// Open a data file with the reader its content matches.
pub fn open(path: impl AsRef<Path>) -> Result<Box<dyn SequenceReader>> {
    let mut file = File::open(path)?;
    let format = detect(&mut file)?;
    reader_for(format, file)
}
