use super::{Format, SeqRecord, SequenceReader, Source, trim_newline};
use crate::error::{Error, Result};
use std::io::{Read, Seek};

/// Minimum number of tab-separated fields in an alignment line.
pub const MIN_FIELDS: usize = 11;

/// SAM reader. Each alignment line is one record; `@` header lines are
/// carried in the raw bytes of the first record so indexes cover the whole
/// file.
pub struct SamReader<R> {
    source: Source<R>,
}

impl<R: Read + Seek> SamReader<R> {
    pub fn new(inner: R) -> Result<Self> {
        Ok(Self {
            source: Source::new(inner)?,
        })
    }
}

impl<R: Read + Seek> SequenceReader for SamReader<R> {
    fn format(&self) -> Format {
        Format::Sam
    }

    fn read(&mut self) -> Result<Option<SeqRecord>> {
        let mut raw = Vec::new();
        if self.read_raw(&mut raw)? == 0 {
            return Ok(None);
        }
        let line = raw
            .split(|b| *b == b'\n')
            .map(trim_newline)
            .find(|l| !l.is_empty() && l[0] != b'@')
            .unwrap_or_default();
        let mut fields = line.split(|b| *b == b'\t');
        let id = fields.next().unwrap_or_default().to_vec();
        let seq = fields.nth(8).unwrap_or_default().to_vec();
        let qual = fields.next().map(<[u8]>::to_vec);
        Ok(Some(SeqRecord { id, seq, qual }))
    }

    fn read_raw(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let mark = buf.len();
        loop {
            let line_start = self.source.offset();
            let line_at = buf.len();
            if self.source.read_line(buf)? == 0 {
                // Headers or blank lines with no alignment after them.
                buf.truncate(mark);
                return Ok(0);
            }
            let line = trim_newline(&buf[line_at..]);
            if line.is_empty() || line[0] == b'@' {
                continue;
            }
            let fields = line.split(|b| *b == b'\t').count();
            if fields < MIN_FIELDS {
                return Err(Error::InvalidRecord {
                    offset: line_start,
                    reason: format!("alignment has {fields} fields, expected at least {MIN_FIELDS}"),
                });
            }
            break;
        }
        self.source.skip_blank(buf)?;
        Ok(buf.len() - mark)
    }

    fn seek_chunk(&mut self, from: u64, chunk_size: u64) -> Result<u64> {
        self.source.seek_boundary(
            from,
            chunk_size,
            |b| !matches!(b, b'@' | b'\n' | b'\r'),
            |_, _| Ok(true),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::testing::raw_spans;
    use std::io::Cursor;

    fn alignment(name: &str) -> String {
        format!("{name}\t0\tchr1\t100\t60\t4M\t*\t0\t0\tACGT\tIIII\n")
    }

    #[test]
    fn test_headers_fold_into_first_record() {
        let header = "@HD\tVN:1.6\n@SQ\tSN:chr1\tLN:1000\n";
        let data = format!("{header}{}{}", alignment("q1"), alignment("q2"));
        let mut reader = SamReader::new(Cursor::new(data.clone().into_bytes())).unwrap();
        let spans = raw_spans(&mut reader);
        let line = alignment("q1").len() as u64;
        assert_eq!(
            spans,
            vec![(0, header.len() as u64 + line), (header.len() as u64 + line, line)]
        );
    }

    #[test]
    fn test_read_extracts_fields() {
        let data = format!("@HD\tVN:1.6\n{}", alignment("q1"));
        let mut reader = SamReader::new(Cursor::new(data.into_bytes())).unwrap();
        let record = reader.read().unwrap().unwrap();
        assert_eq!(record.id, b"q1");
        assert_eq!(record.seq, b"ACGT");
        assert_eq!(record.qual.as_deref(), Some(&b"IIII"[..]));
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn test_short_line_is_invalid() {
        let mut reader = SamReader::new(Cursor::new(&b"q1\t0\tchr1\n"[..])).unwrap();
        let mut buf = Vec::new();
        assert!(matches!(
            reader.read_raw(&mut buf),
            Err(Error::InvalidRecord { offset: 0, .. })
        ));
    }

    #[test]
    fn test_seek_chunk_skips_headers() {
        let mut data = String::from("@HD\tVN:1.6\n");
        for i in 0..200 {
            data.push_str(&alignment(&format!("q{i}")));
        }
        let size = data.len() as u64;
        let bytes = data.into_bytes();
        let mut reader = SamReader::new(Cursor::new(bytes.clone())).unwrap();
        let boundary = reader.seek_chunk(0, 500).unwrap();
        assert!(boundary < 500);
        assert_eq!(bytes[boundary as usize], b'q');
        assert_eq!(reader.seek_chunk(boundary, size).unwrap(), size);
    }
}
