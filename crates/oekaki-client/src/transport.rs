//! The transport seam between the chunk cache and the network.
//!
//! [`ChunkTransport`] is what the cache and viewport tracker actually
//! depend on; [`ConnectionHandle`](crate::ConnectionHandle) is the real
//! implementation, and tests substitute their own.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use oekaki_types::{BlendMode, ChunkCoord, ChunkRect, TileGeometry};

use crate::error::ClientError;

/// Connection lifecycle, observed via [`ChunkTransport::subscribe_status`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
}

/// An unsolicited chunk update pushed by the server.
#[derive(Clone, Debug)]
pub struct RemoteChunk {
    pub coord: ChunkCoord,
    pub data: Arc<Vec<u8>>,
}

/// Operations the sync engine needs from a server connection.
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Tile geometry agreed with the server at handshake.
    fn geometry(&self) -> TileGeometry;

    /// Replace the viewport subscription. Fire-and-forget.
    fn set_range(&self, range: ChunkRect) -> Result<(), ClientError>;

    /// Fetch a chunk's authoritative bytes.
    async fn read_chunk(&self, coord: ChunkCoord) -> Result<Vec<u8>, ClientError>;

    /// Merge a stroke and return the authoritative merged bytes.
    async fn write_chunk(
        &self,
        coord: ChunkCoord,
        data: Vec<u8>,
        mode: BlendMode,
    ) -> Result<Vec<u8>, ClientError>;

    /// Server pushes for chunks entering or inside the subscribed range.
    fn subscribe_chunks(&self) -> broadcast::Receiver<RemoteChunk>;

    /// Connection lifecycle events.
    fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus>;
}
