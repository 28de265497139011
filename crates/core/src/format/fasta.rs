use super::{Format, SeqRecord, SequenceReader, Source, trim_newline};
use crate::error::{Error, Result};
use std::io::{Read, Seek};

/// FASTA reader. A record is a `>` header line followed by sequence lines up
/// to the next header.
pub struct FastaReader<R> {
    source: Source<R>,
}

impl<R: Read + Seek> FastaReader<R> {
    pub fn new(inner: R) -> Result<Self> {
        Ok(Self {
            source: Source::new(inner)?,
        })
    }
}

impl<R: Read + Seek> SequenceReader for FastaReader<R> {
    fn format(&self) -> Format {
        Format::Fasta
    }

    fn read(&mut self) -> Result<Option<SeqRecord>> {
        let mut raw = Vec::new();
        if self.read_raw(&mut raw)? == 0 {
            return Ok(None);
        }
        let mut lines = raw
            .split(|b| *b == b'\n')
            .map(trim_newline)
            .filter(|l| !l.is_empty());
        let id = lines
            .next()
            .and_then(|h| h.strip_prefix(b">"))
            .unwrap_or_default()
            .to_vec();
        let seq = lines.flatten().copied().collect();
        Ok(Some(SeqRecord { id, seq, qual: None }))
    }

    fn read_raw(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let start = self.source.offset();
        let mut n = self.source.skip_blank(buf)?;
        let header_at = buf.len();
        let read = self.source.read_line(buf)?;
        if read == 0 {
            // Only blank lines were left.
            buf.truncate(buf.len() - n);
            return Ok(0);
        }
        n += read;
        if buf[header_at] != b'>' {
            return Err(Error::InvalidRecord {
                offset: start,
                reason: "expected '>' header".into(),
            });
        }
        let mut seq_bytes = 0;
        while let Some(b) = self.source.peek()? {
            if b == b'>' {
                break;
            }
            let line_at = buf.len();
            n += self.source.read_line(buf)?;
            seq_bytes += trim_newline(&buf[line_at..]).len();
        }
        if seq_bytes == 0 {
            return Err(Error::InvalidRecord {
                offset: start,
                reason: "empty sequence".into(),
            });
        }
        Ok(n)
    }

    fn seek_chunk(&mut self, from: u64, chunk_size: u64) -> Result<u64> {
        self.source
            .seek_boundary(from, chunk_size, |b| b == b'>', |_, _| Ok(true))
    }
}
