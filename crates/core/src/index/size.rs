//! Virtual size index: fixed-size chunks computed from the file size alone.

use super::{IndexRecord, query::IndexSource};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeIndex {
    pub chunk_size: u64,
    pub file_size: u64,
}

impl SizeIndex {
    pub fn new(chunk_size: u64, file_size: u64) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            file_size,
        }
    }

    /// Number of chunks.
    pub fn units(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size)
    }

    /// Chunk at 1-based `position`: offset `(p - 1) * chunk_size`, length
    /// capped at the end of the file.
    pub fn locate(&self, position: u64) -> Result<IndexRecord> {
        let out_of_bounds = Error::IndexOutOfBounds {
            position,
            len: self.units(),
        };
        let offset = position
            .checked_sub(1)
            .and_then(|i| i.checked_mul(self.chunk_size))
            .ok_or(out_of_bounds)?;
        if offset >= self.file_size {
            return Err(Error::IndexOutOfBounds {
                position,
                len: self.units(),
            });
        }
        Ok(IndexRecord::new(
            offset,
            self.chunk_size.min(self.file_size - offset),
        ))
    }
}

impl IndexSource for SizeIndex {
    fn len(&self) -> Result<u64> {
        Ok(self.units())
    }

    fn record(&self, position: u64) -> Result<IndexRecord> {
        self.locate(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{PartSpec, part, range};

    #[test]
    fn test_chunk_math() {
        let idx = SizeIndex::new(1_048_576, 2_500_000);
        assert_eq!(idx.units(), 3);
        assert_eq!(idx.locate(1).unwrap(), IndexRecord::new(0, 1_048_576));
        assert_eq!(idx.locate(2).unwrap(), IndexRecord::new(1_048_576, 1_048_576));
        assert_eq!(idx.locate(3).unwrap(), IndexRecord::new(2_097_152, 402_848));
        assert!(matches!(
            idx.locate(4),
            Err(Error::IndexOutOfBounds { position: 4, len: 3 })
        ));
        assert!(matches!(idx.locate(0), Err(Error::IndexOutOfBounds { .. })));
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let idx = SizeIndex::new(10, 30);
        assert_eq!(idx.units(), 3);
        assert_eq!(idx.locate(3).unwrap(), IndexRecord::new(20, 10));
        assert!(idx.locate(4).is_err());
    }

    #[test]
    fn test_range_over_size_index_is_one_span() {
        let idx = SizeIndex::new(1_048_576, 2_500_000);
        let spec: PartSpec = "1-3".parse().unwrap();
        assert_eq!(range(&idx, &spec).unwrap(), vec![IndexRecord::new(0, 2_500_000)]);
        assert_eq!(part(&idx, &spec).unwrap(), IndexRecord::new(0, 2_500_000));
    }
}
