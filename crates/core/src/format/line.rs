use super::{Format, SeqRecord, SequenceReader, Source, trim_newline};
use crate::error::Result;
use std::io::{Read, Seek};

/// Newline-delimited reader: every line, blank ones included, is a record.
pub struct LineReader<R> {
    source: Source<R>,
}

impl<R: Read + Seek> LineReader<R> {
    pub fn new(inner: R) -> Result<Self> {
        Ok(Self {
            source: Source::new(inner)?,
        })
    }

    pub fn size(&self) -> u64 {
        self.source.size()
    }
}

impl<R: Read + Seek> SequenceReader for LineReader<R> {
    fn format(&self) -> Format {
        Format::Line
    }

    fn read(&mut self) -> Result<Option<SeqRecord>> {
        let mut raw = Vec::new();
        if self.read_raw(&mut raw)? == 0 {
            return Ok(None);
        }
        Ok(Some(SeqRecord {
            seq: trim_newline(&raw).to_vec(),
            ..SeqRecord::default()
        }))
    }

    fn read_raw(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        self.source.read_line(buf)
    }

    fn seek_chunk(&mut self, from: u64, chunk_size: u64) -> Result<u64> {
        self.source
            .seek_boundary(from, chunk_size, |b| b != b'\n', |_, _| Ok(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::testing::{chunk_spans, raw_spans};
    use std::io::Cursor;

    #[test]
    fn test_every_line_is_a_record() {
        let mut reader = LineReader::new(Cursor::new(&b"a\n\nbcd\r\nlast"[..])).unwrap();
        assert_eq!(raw_spans(&mut reader), vec![(0, 2), (2, 1), (3, 5), (8, 4)]);
    }

    #[test]
    fn test_read_strips_terminators() {
        let mut reader = LineReader::new(Cursor::new(&b"one\r\ntwo\n"[..])).unwrap();
        assert_eq!(reader.read().unwrap().unwrap().seq, b"one");
        assert_eq!(reader.read().unwrap().unwrap().seq, b"two");
        assert!(reader.read().unwrap().is_none());
    }

    #[test]
    fn test_lone_carriage_return_is_not_a_boundary() {
        let data: Vec<u8> = (0..200)
            .flat_map(|i| format!("col{i}\rrest of line {i}\r\n").into_bytes())
            .collect();
        let size = data.len() as u64;
        let mut reader = LineReader::new(Cursor::new(data.clone())).unwrap();
        let spans = chunk_spans(&mut reader, size, 100);
        assert!(spans.len() > 1);
        for (offset, _) in &spans[1..] {
            assert_eq!(data[*offset as usize - 1], b'\n', "boundary at {offset}");
        }
    }

    #[test]
    fn test_chunks_cover_file() {
        let data: Vec<u8> = (0..500).flat_map(|i| format!("line {i}\n").into_bytes()).collect();
        let size = data.len() as u64;
        let mut reader = LineReader::new(Cursor::new(data.clone())).unwrap();
        assert_eq!(reader.size(), size);
        let spans = chunk_spans(&mut reader, size, 256);
        for (offset, _) in &spans[1..] {
            assert_eq!(data[*offset as usize - 1], b'\n');
        }
    }
}
