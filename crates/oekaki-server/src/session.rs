//! Per-connection message handling.
//!
//! A [`Session`] owns one connection's view of the world: its registry
//! handle (range + dirty buffer) plus shared references to the chunk
//! store and the broadcast router. The connection task feeds it decoded
//! client messages; replies and pushes leave through the handle's
//! outbound channel.

use std::sync::Arc;

use tracing::debug;

use oekaki_store::ChunkStore;
use oekaki_types::{ChunkCoord, ChunkRect, ClientMsg, ServerMsg};

use crate::router::{BroadcastRouter, SessionHandle};

/// One connected painter.
pub struct Session {
    handle: SessionHandle,
    store: Arc<ChunkStore>,
    router: Arc<BroadcastRouter>,
}

impl Session {
    pub fn new(handle: SessionHandle, store: Arc<ChunkStore>, router: Arc<BroadcastRouter>) -> Self {
        Self { handle, store, router }
    }

    /// Handle one decoded client message.
    ///
    /// Nothing in here can fail the connection: malformed ranges are
    /// dropped, malformed writes are answered with `WriteRejected`, and
    /// reads always produce bytes.
    pub async fn handle_message(&self, msg: ClientMsg) {
        match msg {
            ClientMsg::SetRange { x1, y1, x2, y2 } => {
                match ChunkRect::parse(&x1, &y1, &x2, &y2) {
                    Ok(range) => self.handle.set_range(range),
                    // The previous range stands.
                    Err(e) => debug!(session = self.handle.id(), error = %e, "ignoring malformed range"),
                }
            }

            ClientMsg::ReadChunk { seq, x, y } => {
                let data = match ChunkCoord::parse(&x, &y) {
                    Ok(coord) => self.store.read(coord).await.to_vec(),
                    // Reads never fail; an unaddressable chunk is blank.
                    Err(e) => {
                        debug!(session = self.handle.id(), error = %e, "read with malformed coordinate");
                        self.store.geometry().blank()
                    }
                };
                self.handle.send(ServerMsg::ChunkData { seq, data });
            }

            ClientMsg::WriteChunk { seq, x, y, data, erase } => {
                let coord = match ChunkCoord::parse(&x, &y) {
                    Ok(coord) => coord,
                    Err(e) => {
                        self.handle.send(ServerMsg::WriteRejected { seq, message: e.to_string() });
                        return;
                    }
                };
                match self.store.merge(coord, &data, erase.into()).await {
                    Ok(merged) => {
                        self.handle.send(ServerMsg::WriteAck { seq, data: merged.to_vec() });
                        self.router.broadcast(self.handle.id(), coord, &merged);
                    }
                    Err(e) => {
                        self.handle.send(ServerMsg::WriteRejected { seq, message: e.to_string() });
                    }
                }
            }

            ClientMsg::Ping => self.handle.send(ServerMsg::Pong),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::sync::mpsc::UnboundedReceiver;

    use oekaki_types::TileGeometry;

    fn setup() -> (Session, UnboundedReceiver<ServerMsg>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::open(dir.path(), TileGeometry::new(2)).unwrap();
        let router = BroadcastRouter::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = router.register(tx);
        (Session::new(handle, store, router), rx, dir)
    }

    #[tokio::test]
    async fn malformed_range_is_silently_dropped() {
        let (session, mut rx, _dir) = setup();
        session
            .handle_message(ClientMsg::SetRange {
                x1: "0".into(),
                y1: "0".into(),
                x2: "two".into(),
                y2: "2".into(),
            })
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn read_with_malformed_coordinate_yields_blank() {
        let (session, mut rx, _dir) = setup();
        session
            .handle_message(ClientMsg::ReadChunk { seq: 3, x: "nan".into(), y: "0".into() })
            .await;
        match rx.try_recv().unwrap() {
            ServerMsg::ChunkData { seq, data } => {
                assert_eq!(seq, 3);
                assert_eq!(data, vec![0; 16]);
            }
            other => panic!("expected chunk data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (session, mut rx, _dir) = setup();
        let stroke = vec![255u8; 16];
        session
            .handle_message(ClientMsg::WriteChunk {
                seq: 1,
                x: "0".into(),
                y: "0".into(),
                data: stroke.clone(),
                erase: false,
            })
            .await;
        match rx.try_recv().unwrap() {
            ServerMsg::WriteAck { seq, data } => {
                assert_eq!(seq, 1);
                assert_eq!(data, stroke);
            }
            other => panic!("expected ack, got {other:?}"),
        }

        session
            .handle_message(ClientMsg::ReadChunk { seq: 2, x: "0".into(), y: "0".into() })
            .await;
        match rx.try_recv().unwrap() {
            ServerMsg::ChunkData { seq, data } => {
                assert_eq!(seq, 2);
                assert_eq!(data, stroke);
            }
            other => panic!("expected chunk data, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_length_write_is_rejected() {
        let (session, mut rx, _dir) = setup();
        session
            .handle_message(ClientMsg::WriteChunk {
                seq: 9,
                x: "0".into(),
                y: "0".into(),
                data: vec![1, 2, 3],
                erase: false,
            })
            .await;
        match rx.try_recv().unwrap() {
            ServerMsg::WriteRejected { seq, message } => {
                assert_eq!(seq, 9);
                assert!(message.contains("length mismatch"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_pongs() {
        let (session, mut rx, _dir) = setup();
        session.handle_message(ClientMsg::Ping).await;
        assert!(matches!(rx.try_recv().unwrap(), ServerMsg::Pong));
    }
}
