//! Index query engine: translate part specifiers into byte ranges.

use super::{Idx, IndexRecord};
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// A client part specifier: `"N"` or the inclusive range `"N-M"`, 1-indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartSpec {
    Single(u64),
    Range { start: u64, end: u64 },
}

impl PartSpec {
    pub fn bounds(&self) -> (u64, u64) {
        match *self {
            Self::Single(p) => (p, p),
            Self::Range { start, end } => (start, end),
        }
    }

    /// Check `1 <= start <= end <= len`.
    pub fn validate(&self, len: u64) -> Result<(u64, u64)> {
        let (start, end) = self.bounds();
        if start == 0 || start > end || end > len {
            return Err(Error::PartOutOfRange {
                spec: self.to_string(),
                len,
            });
        }
        Ok((start, end))
    }
}

impl FromStr for PartSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| Error::InvalidPartSpecifier(s.to_string()))
        };
        match s.split_once('-') {
            None => Ok(Self::Single(parse(s)?)),
            Some((start, end)) => Ok(Self::Range {
                start: parse(start)?,
                end: parse(end)?,
            }),
        }
    }
}

impl fmt::Display for PartSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(p) => write!(f, "{p}"),
            Self::Range { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

/// Anything that can serve index records by 1-based position.
pub trait IndexSource {
    /// Number of records.
    fn len(&self) -> Result<u64>;

    /// Record at 1-based `position`.
    fn record(&self, position: u64) -> Result<IndexRecord>;

    /// Records `start..=end` (1-based). Sources with cheap bulk reads override this.
    fn records(&self, start: u64, end: u64) -> Result<Vec<IndexRecord>> {
        (start..=end).map(|p| self.record(p)).collect()
    }
}

impl IndexSource for Idx {
    fn len(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }

    fn record(&self, position: u64) -> Result<IndexRecord> {
        let len = self.records.len() as u64;
        position
            .checked_sub(1)
            .and_then(|i| self.records.get(i as usize))
            .copied()
            .ok_or(Error::IndexOutOfBounds { position, len })
    }

    fn records(&self, start: u64, end: u64) -> Result<Vec<IndexRecord>> {
        let len = self.records.len() as u64;
        if start == 0 || end > len || start > end {
            return Err(Error::IndexOutOfBounds {
                position: end,
                len,
            });
        }
        Ok(self.records[(start - 1) as usize..end as usize].to_vec())
    }
}

/// Single span query for contiguous indexes.
///
/// For a range the span runs from the start of the first record to the end
/// of the last, so it is only meaningful when the records in between are
/// contiguous (record, line, chunkrecord, column).
pub fn part<S: IndexSource + ?Sized>(source: &S, spec: &PartSpec) -> Result<IndexRecord> {
    let (start, end) = spec.validate(source.len()?)?;
    let first = source.record(start)?;
    if first.checked_end().is_none() {
        return Err(Error::MalformedIndex {
            position: start,
            reason: "range overflows".to_string(),
        });
    }
    if start == end {
        return Ok(first);
    }
    let last = source.record(end)?;
    let length = last
        .checked_end()
        .and_then(|last_end| last_end.checked_sub(first.offset))
        .ok_or_else(|| Error::MalformedIndex {
            position: end,
            reason: format!("record ends before record {start} starts"),
        })?;
    Ok(IndexRecord::new(first.offset, length))
}

/// Gap-safe query: the minimal list of disjoint byte ranges covering the
/// requested records, merging neighbours that touch.
pub fn range<S: IndexSource + ?Sized>(source: &S, spec: &PartSpec) -> Result<Vec<IndexRecord>> {
    let (start, end) = spec.validate(source.len()?)?;
    Ok(coalesce(source.records(start, end)?))
}

/// Merge records where `prev.offset + prev.length == next.offset`.
pub fn coalesce(records: impl IntoIterator<Item = IndexRecord>) -> Vec<IndexRecord> {
    let mut out: Vec<IndexRecord> = Vec::new();
    for record in records {
        match out.last_mut() {
            Some(prev)
                if prev.checked_end() == Some(record.offset) && record.checked_end().is_some() =>
            {
                prev.length += record.length
            }
            _ => out.push(record),
        }
    }
    out
}
