use super::{Format, SeqRecord, SequenceReader, Source, trim_newline};
use crate::error::{Error, Result};
use std::io::{Read, Seek};

/// FASTQ reader for four-line records: `@id`, sequence, `+[id]`, quality.
pub struct FastqReader<R> {
    source: Source<R>,
}

impl<R: Read + Seek> FastqReader<R> {
    pub fn new(inner: R) -> Result<Self> {
        Ok(Self {
            source: Source::new(inner)?,
        })
    }
}

/// Check one record's lines, offsets relative to the record start.
fn validate(offset: u64, lines: &[&[u8]; 4]) -> Result<()> {
    let [header, seq, plus, qual] = lines.map(trim_newline);
    let id = header.strip_prefix(b"@").ok_or_else(|| Error::InvalidRecord {
        offset,
        reason: "expected '@' header".into(),
    })?;
    let separator = plus.strip_prefix(b"+").ok_or_else(|| Error::InvalidRecord {
        offset,
        reason: "expected '+' separator".into(),
    })?;
    if !separator.is_empty() && separator != id {
        return Err(Error::MismatchedId {
            offset,
            header: String::from_utf8_lossy(id).into_owned(),
            separator: String::from_utf8_lossy(separator).into_owned(),
        });
    }
    if seq.len() != qual.len() {
        return Err(Error::LengthMismatch {
            offset,
            seq: seq.len(),
            qual: qual.len(),
        });
    }
    Ok(())
}

impl<R: Read + Seek> SequenceReader for FastqReader<R> {
    fn format(&self) -> Format {
        Format::Fastq
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
        let header = lines.next().unwrap_or_default();
        let seq = lines.next().unwrap_or_default();
        let qual = lines.nth(1).unwrap_or_default();
        Ok(Some(SeqRecord {
            id: header.get(1..).unwrap_or_default().to_vec(),
            seq: seq.to_vec(),
            qual: Some(qual.to_vec()),
        }))
    }

    fn read_raw(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let blank = self.source.skip_blank(buf)?;
        let start = self.source.offset();
        let mut bounds = [0usize; 5];
        bounds[0] = buf.len();
        for i in 0..4 {
            let read = self.source.read_line(buf)?;
            if read == 0 {
                if i == 0 {
                    buf.truncate(buf.len() - blank);
                    return Ok(0);
                }
                return Err(Error::TruncatedRecord { offset: start });
            }
            bounds[i + 1] = buf.len();
        }
        let lines = [
            &buf[bounds[0]..bounds[1]],
            &buf[bounds[1]..bounds[2]],
            &buf[bounds[2]..bounds[3]],
            &buf[bounds[3]..bounds[4]],
        ];
        validate(start, &lines)?;
        let trailing = self.source.skip_blank(buf)?;
        Ok(blank + (bounds[4] - bounds[0]) + trailing)
    }

    fn seek_chunk(&mut self, from: u64, chunk_size: u64) -> Result<u64> {
        self.source.seek_boundary(
            from,
            chunk_size,
            |b| b == b'@',
            |source, candidate| {
                let lines = source.lines_at(candidate, 4)?;
                let Ok(lines): std::result::Result<[Vec<u8>; 4], _> = lines.try_into() else {
                    return Ok(false);
                };
                let refs = [
                    lines[0].as_slice(),
                    lines[1].as_slice(),
                    lines[2].as_slice(),
                    lines[3].as_slice(),
                ];
                Ok(validate(candidate, &refs).is_ok())
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::testing::{chunk_spans, raw_spans};
    use std::io::Cursor;

    const DATA: &[u8] = b"@r1\nACGT\n+\nIIII\n@r2\nGG\n+r2\n@@\n";

    #[test]
    fn test_read_parses_records() {
        let mut reader = FastqReader::new(Cursor::new(DATA)).unwrap();
        let first = reader.read().unwrap().unwrap();
        assert_eq!(first.id, b"r1");
        assert_eq!(first.seq, b"ACGT");
        assert_eq!(first.qual.as_deref(), Some(&b"IIII"[..]));
        let second = reader.read().unwrap().unwrap();
        assert_eq!(second.qual.as_deref(), Some(&b"@@"[..]));
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn test_raw_spans() {
        let mut reader = FastqReader::new(Cursor::new(DATA)).unwrap();
        assert_eq!(raw_spans(&mut reader), vec![(0, 16), (16, 14)]);
    }

    #[test]
    fn test_final_quality_without_newline() {
        let mut reader = FastqReader::new(Cursor::new(&b"@r1\nAC\n+\nII"[..])).unwrap();
        assert_eq!(raw_spans(&mut reader), vec![(0, 11)]);
    }

    #[test]
    fn test_truncated_record() {
        let mut reader = FastqReader::new(Cursor::new(&b"@r1\nACGT\n+\nIIII\n@r2\nGG\n"[..])).unwrap();
        let mut buf = Vec::new();
        reader.read_raw(&mut buf).unwrap();
        assert!(matches!(
            reader.read_raw(&mut buf),
            Err(Error::TruncatedRecord { offset: 16 })
        ));
    }

    #[test]
    fn test_mismatched_id() {
        let mut reader = FastqReader::new(Cursor::new(&b"@r1\nAC\n+r9\nII\n"[..])).unwrap();
        assert!(matches!(reader.read(), Err(Error::MismatchedId { .. })));
    }

    #[test]
    fn test_length_mismatch() {
        let mut reader = FastqReader::new(Cursor::new(&b"@r1\nACG\n+\nII\n"[..])).unwrap();
        assert!(matches!(
            reader.read(),
            Err(Error::LengthMismatch { seq: 3, qual: 2, .. })
        ));
    }

    #[test]
    fn test_seek_chunk_skips_quality_lines_starting_with_at() {
        let mut data = Vec::new();
        for i in 0..1500 {
            data.extend_from_slice(format!("@read{i}\nACGTACGTAC\n+\n@@@@@@@@@@\n").as_bytes());
        }
        let size = data.len() as u64;
        let mut reader = FastqReader::new(Cursor::new(data.clone())).unwrap();
        let spans = chunk_spans(&mut reader, size, 1000);
        assert!(spans.len() > 10);
        for (offset, _) in &spans {
            assert!(data[*offset as usize..].starts_with(b"@read"));
        }
    }
}
