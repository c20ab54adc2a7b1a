//! oekaki server library.
//!
//! TCP sync server for the shared canvas: per-connection sessions with
//! viewport ranges and dirty buffers, a broadcast router fanning committed
//! writes out to visible sessions, and the chunk store behind it all.

pub mod config;
pub mod router;
pub mod server;
pub mod session;

pub use config::{DEFAULT_FLUSH_INTERVAL, DEFAULT_PORT, DEVELOPMENT_PORT, ServerConfig};
pub use router::{BroadcastRouter, SessionHandle, SessionId};
pub use server::{Server, frame_codec};
pub use session::Session;
