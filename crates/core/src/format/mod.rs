//! Streaming readers for sequence and line-oriented data files.
//!
//! Every reader tracks its byte offset so indexers can turn raw records into
//! `(offset, length)` pairs, and can locate a record boundary near a target
//! position for chunked indexing without scanning the whole file.

pub mod fasta;
pub mod fastq;
pub mod line;
pub mod multi;
pub mod sam;

pub use fasta::FastaReader;
pub use fastq::FastqReader;
pub use line::LineReader;
pub use multi::{detect, open};
pub use sam::SamReader;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};

/// Size of the probe window used by [`SequenceReader::seek_chunk`].
pub const WINDOW_SIZE: u64 = 32 * 1024;

/// How many leading bytes format detection inspects.
pub const DETECT_SIZE: usize = 32 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Fasta,
    Fastq,
    Sam,
    Line,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fasta => "fasta",
            Self::Fastq => "fastq",
            Self::Sam => "sam",
            Self::Line => "line",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeqRecord {
    pub id: Vec<u8>,
    pub seq: Vec<u8>,
    pub qual: Option<Vec<u8>>,
}

pub trait SequenceReader {
    fn format(&self) -> Format;

    /// Parse the next record, `None` at end of input.
    fn read(&mut self) -> Result<Option<SeqRecord>>;

    /// Append the next record's raw bytes to `buf` and return how many bytes
    /// were consumed; `0` means end of input.
    fn read_raw(&mut self, buf: &mut Vec<u8>) -> Result<usize>;

    /// Absolute offset of the record boundary closest to (and not after)
    /// `from + chunk_size`, or the first one after it when the probe window
    /// holds none. Returns the file size once the chunk reaches the end.
    fn seek_chunk(&mut self, from: u64, chunk_size: u64) -> Result<u64>;
}

/// Buffered input with offset tracking and positional probing.
pub(crate) struct Source<R> {
    reader: BufReader<R>,
    size: u64,
    offset: u64,
}

impl<R: Read + Seek> Source<R> {
    pub(crate) fn new(mut inner: R) -> Result<Self> {
        let size = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader: BufReader::new(inner),
            size,
            offset: 0,
        })
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Append one line, terminator included.
    pub(crate) fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let n = self.reader.read_until(b'\n', buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    pub(crate) fn peek(&mut self) -> Result<Option<u8>> {
        Ok(self.reader.fill_buf()?.first().copied())
    }

    /// Consume empty lines into `buf`.
    pub(crate) fn skip_blank(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let mut n = 0;
        while matches!(self.peek()?, Some(b'\n' | b'\r')) {
            n += self.read_line(buf)?;
        }
        Ok(n)
    }

    /// Read up to `len` bytes at `start` without moving the sequential cursor.
    pub(crate) fn read_at(&mut self, start: u64, len: u64) -> Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(start))?;
        let mut buf = Vec::with_capacity(len.min(WINDOW_SIZE * 2) as usize);
        let result = self.reader.by_ref().take(len).read_to_end(&mut buf);
        self.reader.seek(SeekFrom::Start(self.offset))?;
        result?;
        Ok(buf)
    }

    /// Read up to `count` lines at `start` without moving the sequential cursor.
    pub(crate) fn lines_at(&mut self, start: u64, count: usize) -> Result<Vec<Vec<u8>>> {
        self.reader.seek(SeekFrom::Start(start))?;
        let mut lines = Vec::with_capacity(count);
        let mut result = Ok(());
        for _ in 0..count {
            let mut line = Vec::new();
            match self.reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => lines.push(line),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.reader.seek(SeekFrom::Start(self.offset))?;
        result?;
        Ok(lines)
    }

    /// Shared chunk-boundary search.
    ///
    /// A candidate is a position whose previous byte is a line terminator and
    /// whose own byte satisfies `starts`; `confirm` may reject it after
    /// inspecting the surrounding data.
    pub(crate) fn seek_boundary(
        &mut self,
        from: u64,
        chunk_size: u64,
        starts: impl Fn(u8) -> bool,
        mut confirm: impl FnMut(&mut Self, u64) -> Result<bool>,
    ) -> Result<u64> {
        let target = from.saturating_add(chunk_size.max(1));
        if target >= self.size {
            return Ok(self.size);
        }

        // Backward: last boundary in [lo, target).
        let lo = (from + 1).max(target.saturating_sub(WINDOW_SIZE));
        let window = self.read_at(lo - 1, target - lo + 1)?;
        for i in (1..window.len()).rev() {
            if is_line_start(&window, i) && starts(window[i]) {
                let candidate = lo - 1 + i as u64;
                if confirm(self, candidate)? {
                    return Ok(candidate);
                }
            }
        }

        // Forward: first boundary at or after target, one window at a time.
        let mut base = target;
        while base < self.size {
            let window = self.read_at(base - 1, WINDOW_SIZE + 1)?;
            for i in 1..window.len() {
                if is_line_start(&window, i) && starts(window[i]) {
                    let candidate = base - 1 + i as u64;
                    if confirm(self, candidate)? {
                        return Ok(candidate);
                    }
                }
            }
            base += WINDOW_SIZE;
        }
        Ok(self.size)
    }
}

/// Only `\n` ends a line; a `\r` before it belongs to the same line.
fn is_line_start(window: &[u8], i: usize) -> bool {
    window[i - 1] == b'\n'
}

/// Strip one trailing `\n` and an optional `\r` before it.
pub(crate) fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::SequenceReader;

    /// Walk a reader with `read_raw` and collect `(offset, length)` pairs.
    pub fn raw_spans(reader: &mut dyn SequenceReader) -> Vec<(u64, u64)> {
        let mut spans = Vec::new();
        let mut offset = 0;
        loop {
            let mut buf = Vec::new();
            let n = reader.read_raw(&mut buf).unwrap() as u64;
            if n == 0 {
                break;
            }
            assert_eq!(buf.len() as u64, n);
            spans.push((offset, n));
            offset += n;
        }
        spans
    }

    /// Walk a file with `seek_chunk` and collect chunk spans.
    pub fn chunk_spans(reader: &mut dyn SequenceReader, size: u64, chunk: u64) -> Vec<(u64, u64)> {
        let mut spans = Vec::new();
        let mut from = 0;
        while from < size {
            let next = reader.seek_chunk(from, chunk).unwrap();
            assert!(next > from && next <= size);
            spans.push((from, next - from));
            from = next;
        }
        spans
    }
}
