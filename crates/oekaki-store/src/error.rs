//! Error types for chunk storage.

use thiserror::Error;

/// Errors that can reach callers of the chunk store.
///
/// Disk trouble during reads and flushes is deliberately not here: a
/// missing or unreadable chunk file reads as a blank chunk, and flush
/// failures are logged per file (the cache still holds the bytes, so the
/// next merge re-queues them).
#[derive(Error, Debug)]
pub enum StoreError {
    /// A merge buffer whose length does not match the tile geometry.
    #[error("chunk length mismatch (expected {expected}, received {got})")]
    LengthMismatch { expected: usize, got: usize },

    /// The chunk root directory could not be created at startup.
    #[error("chunk root unavailable: {0}")]
    Root(#[from] std::io::Error),
}
