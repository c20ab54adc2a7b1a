//! Durable chunk storage for the oekaki canvas engine.
//!
//! One [`ChunkStore`] owns the authoritative state of every chunk the
//! process has touched: a read-through in-memory cache over one raw file
//! per chunk, alpha-compositing merges serialized per coordinate, and a
//! coalescing write queue drained by a background flusher.

mod error;
mod store;

pub use error::StoreError;
pub use store::ChunkStore;
