//! Byte ranges into source text

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `[start, end]` byte interval in a source text.
///
/// `end` is the offset just past the last byte of the node. Containment is
/// inclusive at both ends so that a cursor resting between two adjacent
/// tokens belongs to both of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextRange {
    /// First byte of the range
    pub start: usize,

    /// Offset just past the last byte of the range
    pub end: usize,
}

impl TextRange {
    /// Create a new range
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "inverted range {start}..{end}");
        Self { start, end }
    }

    /// Empty range at `offset`
    pub fn empty(offset: usize) -> Self {
        Self::new(offset, offset)
    }

    /// Check whether `offset` lies within the range (inclusive at both ends)
    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset <= self.end
    }

    /// Number of bytes covered
    pub fn width(&self) -> usize {
        self.end - self.start
    }

    /// Smallest range covering both `self` and `other`
    pub fn cover(self, other: TextRange) -> TextRange {
        TextRange::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Slice `text` with this range
    pub fn slice<'t>(&self, text: &'t str) -> Option<&'t str> {
        text.get(self.start..self.end)
    }
}

impl fmt::Display for TextRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
