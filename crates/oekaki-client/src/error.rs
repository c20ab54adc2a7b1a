//! Error types for the client engine.

use thiserror::Error;

/// Errors surfaced by the connection and cache layers.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The connection is down; the actor is reconnecting in the background.
    #[error("not connected to server")]
    Disconnected,

    /// The connection actor is gone (its handle channel closed).
    #[error("connection actor shut down")]
    Shutdown,

    /// The server rejected a write without mutating anything.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// A stroke buffer whose length does not match the tile geometry.
    #[error("stroke length mismatch (expected {expected}, received {got})")]
    LengthMismatch { expected: usize, got: usize },

    /// The initial TCP connect failed.
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    /// The server broke the wire contract (bad handshake or frame).
    #[error("protocol violation: {0}")]
    Protocol(String),
}
