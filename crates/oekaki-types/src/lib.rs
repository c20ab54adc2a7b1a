//! Shared types for the oekaki canvas engine.
//!
//! This crate is the pure leaf the rest of the workspace builds on: chunk
//! coordinates and viewport rectangles, tile geometry, the alpha-compositing
//! kernel, and the wire protocol with its binary codec. It has **no internal
//! oekaki dependencies** and does no I/O.
//!
//! # Key Types
//!
//! | Type            | Purpose                                          |
//! |-----------------|--------------------------------------------------|
//! | [`ChunkCoord`]  | Which tile of the infinite plane                 |
//! | [`ChunkRect`]   | Half-open rectangle of tiles (a viewport range)  |
//! | [`TileGeometry`]| Tile size and derived RGBA buffer length         |
//! | [`BlendMode`]   | How an incoming stroke combines with a chunk     |
//! | [`ClientMsg`]   | Client → server wire messages                    |
//! | [`ServerMsg`]   | Server → client wire messages                    |

pub mod codec;
pub mod compose;
pub mod coord;
pub mod geometry;
pub mod protocol;
pub mod rect;

pub use codec::{CodecError, decode, encode};
pub use compose::{BlendMode, merge_chunk, merge_into};
pub use coord::{ChunkCoord, CoordParseError};
pub use geometry::{DEFAULT_TILE_SIZE, TileGeometry};
pub use protocol::{ClientMsg, MAX_FRAME_LEN, ServerMsg};
pub use rect::ChunkRect;
