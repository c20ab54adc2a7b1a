//! Tile geometry shared by every layer that touches chunk buffers.

use serde::{Deserialize, Serialize};

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 64;

/// The size of one square tile and the buffer layout that follows from it.
///
/// Chunks are `tile_size × tile_size` RGBA8 pixels, so every chunk buffer
/// in the system is exactly [`byte_len`](Self::byte_len) bytes. The server
/// announces its geometry in the `Hello` frame so both ends agree before
/// any chunk bytes move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGeometry {
    tile_size: u32,
}

impl TileGeometry {
    pub fn new(tile_size: u32) -> Self {
        Self { tile_size }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Exact byte length of one chunk buffer: `tile_size² × 4` (RGBA).
    pub fn byte_len(&self) -> usize {
        (self.tile_size as usize) * (self.tile_size as usize) * 4
    }

    /// A fully transparent chunk. Absent durable state reads as this.
    pub fn blank(&self) -> Vec<u8> {
        vec![0; self.byte_len()]
    }

    /// Whether a buffer has the length this geometry requires.
    pub fn fits(&self, buf: &[u8]) -> bool {
        buf.len() == self.byte_len()
    }
}

impl Default for TileGeometry {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_len_is_rgba() {
        assert_eq!(TileGeometry::new(64).byte_len(), 64 * 64 * 4);
        assert_eq!(TileGeometry::new(1).byte_len(), 4);
    }

    #[test]
    fn blank_is_transparent() {
        let geom = TileGeometry::new(2);
        let blank = geom.blank();
        assert!(geom.fits(&blank));
        assert!(blank.iter().all(|&b| b == 0));
    }
}
