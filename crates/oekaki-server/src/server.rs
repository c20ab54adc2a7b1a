//! TCP server: accept loop and per-connection tasks.
//!
//! Each connection gets a reader task (this function's body) and a writer
//! task draining the session's outbound channel into the framed sink.
//! Frames are length-delimited; payloads are postcard (see
//! `oekaki_types::codec`).

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use oekaki_store::ChunkStore;
use oekaki_types::{ClientMsg, MAX_FRAME_LEN, ServerMsg, codec};

use crate::config::ServerConfig;
use crate::router::BroadcastRouter;
use crate::session::Session;

/// Frame codec shared by server and tests.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// The oekaki sync server.
pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bind the configured address and serve until interrupted.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_on(listener).await
    }

    /// Serve on an already-bound listener (tests bind their own ephemeral
    /// port). Returns after ctrl-c, once the final flush has completed.
    pub async fn run_on(&self, listener: TcpListener) -> std::io::Result<()> {
        let store = ChunkStore::open(&self.config.chunks_dir, self.config.geometry)
            .map_err(std::io::Error::other)?;
        let router = BroadcastRouter::new();
        let flusher = store.spawn_flusher(self.config.flush_interval);

        info!(addr = %listener.local_addr()?, chunks_dir = %self.config.chunks_dir.display(), "listening");

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        // Connection tasks live in the join set so shutdown tears them
        // down with the server instead of leaving them dangling.
        let mut connections = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            store.clone(),
                            router.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut shutdown => {
                    info!("interrupt received, shutting down");
                    break;
                }
            }
        }

        // Drop live connections, stop the periodic flusher, then drain
        // whatever it had not gotten to yet.
        connections.shutdown().await;
        flusher.abort();
        let flushed = store.flush_once().await;
        info!(chunks = flushed, "final flush complete");
        Ok(())
    }
}

/// Serve one connection until its stream ends.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    store: Arc<ChunkStore>,
    router: Arc<BroadcastRouter>,
) {
    let framed = Framed::new(stream, frame_codec());
    let (mut sink, mut frames) = framed.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMsg>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let payload = match codec::encode(&msg) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "failed to encode outbound message");
                    continue;
                }
            };
            if sink.send(Bytes::from(payload)).await.is_err() {
                break;
            }
        }
    });

    // Geometry handshake before anything else moves.
    let _ = tx.send(ServerMsg::Hello {
        tile_size: store.geometry().tile_size(),
    });

    let handle = router.register(tx);
    let id = handle.id();
    info!(session = id, %peer, "connected");

    let session = Session::new(handle, store, router.clone());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(buf) => match codec::decode::<ClientMsg>(&buf) {
                Ok(msg) => session.handle_message(msg).await,
                Err(e) => debug!(session = id, error = %e, "dropping undecodable frame"),
            },
            Err(e) => {
                debug!(session = id, error = %e, "connection read error");
                break;
            }
        }
    }

    // Deregistration plus dropping the session releases every sender, so
    // the writer drains what is queued and exits.
    router.deregister(id);
    drop(session);
    let _ = writer.await;
    info!(session = id, %peer, "disconnected");
}
