//! Wire protocol between oekaki clients and the server.
//!
//! Each connection is a persistent TCP stream carrying length-delimited
//! frames; a frame's payload is one postcard-encoded message. Coordinates
//! travel as decimal strings so the wire format never constrains the
//! plane; the engine parses them on receipt (see
//! [`ChunkCoord::parse`](crate::ChunkCoord::parse)).
//!
//! Request/response pairs are correlated by the client-chosen `seq`;
//! `SetRange` and `Ping` are fire-and-forget, and `Chunk` arrives
//! unsolicited whenever another painter touches a visible tile.

use serde::{Deserialize, Serialize};

/// Upper bound for one frame on the wire.
///
/// Generous headroom above a chunk payload even at large tile sizes.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Messages a client sends to the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMsg {
    /// Replace this connection's viewport subscription.
    SetRange {
        x1: String,
        y1: String,
        x2: String,
        y2: String,
    },
    /// Request a chunk's current bytes. Always answered with `ChunkData`.
    ReadChunk { seq: u64, x: String, y: String },
    /// Merge a stroke buffer into a chunk.
    ///
    /// Answered with `WriteAck` carrying the authoritative merged bytes,
    /// or `WriteRejected` if the buffer is malformed.
    WriteChunk {
        seq: u64,
        x: String,
        y: String,
        data: Vec<u8>,
        erase: bool,
    },
    /// Heartbeat.
    Ping,
}

/// Messages the server sends to a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMsg {
    /// First frame on every connection: the geometry chunks use.
    Hello { tile_size: u32 },
    /// Response to `ReadChunk`.
    ChunkData { seq: u64, data: Vec<u8> },
    /// Response to a successful `WriteChunk`: the merged authoritative bytes.
    WriteAck { seq: u64, data: Vec<u8> },
    /// Response to a malformed `WriteChunk`. No state was changed.
    WriteRejected { seq: u64, message: String },
    /// Unsolicited push: another session changed a chunk in (or newly
    /// entering) this connection's range.
    Chunk { x: String, y: String, data: Vec<u8> },
    /// Heartbeat reply.
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode};

    #[test]
    fn write_chunk_round_trips_through_codec() {
        let msg = ClientMsg::WriteChunk {
            seq: 7,
            x: "-12".into(),
            y: "900719925474099".into(),
            data: vec![0, 1, 2, 255],
            erase: true,
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode::<ClientMsg>(&bytes).unwrap(), msg);
    }

    #[test]
    fn push_round_trips_through_codec() {
        let msg = ServerMsg::Chunk {
            x: "3".into(),
            y: "-4".into(),
            data: vec![9; 16],
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode::<ServerMsg>(&bytes).unwrap(), msg);
    }

    #[test]
    fn truncated_frame_fails_decode() {
        let bytes = encode(&ServerMsg::Hello { tile_size: 64 }).unwrap();
        assert!(decode::<ServerMsg>(&bytes[..bytes.len() - 1]).is_err());
    }
}
