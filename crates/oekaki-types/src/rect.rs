//! Half-open rectangles of chunk coordinates.

use serde::{Deserialize, Serialize};

use crate::coord::{ChunkCoord, CoordParseError};

/// An axis-aligned half-open rectangle `[x1,x2) × [y1,y2)` in chunk units.
///
/// This is the shape of a viewport subscription: a session's range is
/// replaced wholesale on every camera move, and a coordinate is "visible"
/// iff `contains` returns true.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRect {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl ChunkRect {
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Parse a rectangle from its wire form (four decimal strings).
    ///
    /// Any unparsable component fails the whole rectangle.
    pub fn parse(x1: &str, y1: &str, x2: &str, y2: &str) -> Result<Self, CoordParseError> {
        let a = ChunkCoord::parse(x1, y1)?;
        let b = ChunkCoord::parse(x2, y2)?;
        Ok(Self::new(a.x, a.y, b.x, b.y))
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.x1 <= coord.x && coord.x < self.x2 && self.y1 <= coord.y && coord.y < self.y2
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// All coordinates inside the rectangle, row-major.
    pub fn iter(&self) -> impl Iterator<Item = ChunkCoord> + use<> {
        let &Self { x1, y1, x2, y2 } = self;
        (y1..y2).flat_map(move |y| (x1..x2).map(move |x| ChunkCoord::new(x, y)))
    }

    /// Number of chunks covered.
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            ((self.x2 - self.x1) as usize) * ((self.y2 - self.y1) as usize)
        }
    }
}
