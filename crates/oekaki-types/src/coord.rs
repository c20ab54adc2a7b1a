//! Chunk coordinates on the infinite plane.
//!
//! A coordinate is a pair of signed 64-bit integers addressing one tile.
//! On the wire coordinates travel as decimal strings, so the protocol
//! itself is representation-agnostic; this engine parses them into i64,
//! which bounds the usable plane to ±2⁶³ chunks per axis. The text form
//! `"x,y"` doubles as the chunk's file name in durable storage.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A chunk's position on the plane, in tile units.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i64,
    pub y: i64,
}

/// A coordinate string that did not parse as a 64-bit integer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid chunk coordinate: {0:?}")]
pub struct CoordParseError(pub String);

impl ChunkCoord {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Parse a coordinate from its wire form (two decimal strings).
    pub fn parse(x: &str, y: &str) -> Result<Self, CoordParseError> {
        let x = x.parse().map_err(|_| CoordParseError(x.to_owned()))?;
        let y = y.parse().map_err(|_| CoordParseError(y.to_owned()))?;
        Ok(Self { x, y })
    }

    /// The wire form: decimal strings for each axis.
    pub fn to_wire(self) -> (String, String) {
        (self.x.to_string(), self.y.to_string())
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl From<(i64, i64)> for ChunkCoord {
    fn from((x, y): (i64, i64)) -> Self {
        Self { x, y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_wire_form() {
        let coord = ChunkCoord::new(-3, 9_007_199_254_740_993);
        let (x, y) = coord.to_wire();
        assert_eq!(ChunkCoord::parse(&x, &y).unwrap(), coord);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ChunkCoord::parse("1.5", "0").is_err());
        assert!(ChunkCoord::parse("0", "abc").is_err());
        assert!(ChunkCoord::parse("", "0").is_err());
        // Past i64 range.
        assert!(ChunkCoord::parse("9223372036854775808", "0").is_err());
    }

    #[test]
    fn display_is_file_name_form() {
        assert_eq!(ChunkCoord::new(-4, 17).to_string(), "-4,17");
    }
}
