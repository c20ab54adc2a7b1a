//! oekaki client engine.
//!
//! Everything a canvas front-end needs short of actually drawing pixels:
//!
//! - [`ConnectionHandle`]: actor-backed server connection with
//!   request/response correlation, push delivery, and auto-reconnect.
//! - [`ChunkCache`]: per-process chunk bytes with optimistic merges,
//!   staleness-guarded acknowledgments, and retrying reads.
//! - [`ViewportTracker`]: camera-to-subscription plumbing.
//!
//! The render layer consumes [`CanvasEvent`]s and draws whatever the
//! cache currently holds; paint gestures call
//! [`ChunkCache::write_chunk`] per affected coordinate (see
//! [`viewport::stroke_rect`]).

pub mod cache;
pub mod connection;
pub mod error;
mod stamps;
pub mod transport;
pub mod viewport;

pub use cache::{CanvasEvent, ChunkCache};
pub use connection::ConnectionHandle;
pub use error::ClientError;
pub use transport::{ChunkTransport, ConnectionStatus, RemoteChunk};
pub use viewport::{Camera, ViewportTracker, stroke_rect, visible_rect};
