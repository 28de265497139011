//! Byte segments of local files, concatenated into one logical stream.

use std::path::PathBuf;

/// `length` bytes of `path` starting at `offset`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
}

impl Segment {
    pub fn new(path: impl Into<PathBuf>, offset: u64, length: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            length,
        }
    }

    /// The first `length` bytes of `path`.
    pub fn whole(path: impl Into<PathBuf>, length: u64) -> Self {
        Self::new(path, 0, length)
    }
}

pub fn total_len(segments: &[Segment]) -> u64 {
    segments.iter().map(|s| s.length).sum()
}

/// Restrict a concatenation to the logical range `[offset, offset + length)`.
/// The range is clipped to the end of the concatenation.
pub fn slice(segments: &[Segment], offset: u64, length: u64) -> Vec<Segment> {
    let end = offset.saturating_add(length);
    let mut out = Vec::new();
    let mut base = 0u64;
    for segment in segments {
        let seg_end = base + segment.length;
        let lo = offset.max(base);
        let hi = end.min(seg_end);
        if lo < hi {
            out.push(Segment::new(
                segment.path.clone(),
                segment.offset + (lo - base),
                hi - lo,
            ));
        }
        if seg_end >= end {
            break;
        }
        base = seg_end;
    }
    out
}
