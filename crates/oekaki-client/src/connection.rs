//! Actor-based server connection.
//!
//! Provides a cloneable, `Send + Sync` [`ConnectionHandle`] in front of an
//! actor task that owns the framed TCP stream. Each request sends a
//! command over mpsc and awaits a oneshot reply; responses are correlated
//! to requests by sequence number.
//!
//! ```text
//!   ConnectionHandle (Send+Sync)   mpsc     ConnectionActor (task)
//!   ┌───────────────────────┐  ─────────▶  ┌─────────────────────────┐
//!   │ .read_chunk()         │              │ framed TCP stream       │
//!   │ .write_chunk()        │  ◀─────────  │ seq → pending replies   │
//!   │ .set_range()          │   oneshot    │ auto-reconnect          │
//!   └───────────────────────┘              └─────────────────────────┘
//! ```
//!
//! The actor reconnects on its own after a lost connection, re-issuing
//! the last viewport range before announcing `Connected` so the server
//! repopulates the subscription; subscribers see the gap as a
//! `Disconnected`/`Connected` pair and reconcile from there (the cache
//! clears itself on `Disconnected`).

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, trace, warn};

use oekaki_types::{
    BlendMode, ChunkCoord, ChunkRect, ClientMsg, MAX_FRAME_LEN, ServerMsg, TileGeometry, codec,
};

use crate::error::ClientError;
use crate::transport::{ChunkTransport, ConnectionStatus, RemoteChunk};

/// Delay between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long the server gets to answer the geometry handshake.
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Heartbeat interval while connected.
const PING_INTERVAL: Duration = Duration::from_secs(1);

/// Capacity of the push/status broadcast channels.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type FrameSink = SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;
type FrameStream = SplitStream<Framed<TcpStream, LengthDelimitedCodec>>;
type Reply = oneshot::Sender<Result<Vec<u8>, ClientError>>;

enum Command {
    SetRange(ChunkRect),
    Read {
        coord: ChunkCoord,
        reply: Reply,
    },
    Write {
        coord: ChunkCoord,
        data: Vec<u8>,
        mode: BlendMode,
        reply: Reply,
    },
}

/// Cloneable handle to a live connection actor.
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<Command>,
    geometry: TileGeometry,
    push_tx: broadcast::Sender<RemoteChunk>,
    status_tx: broadcast::Sender<ConnectionStatus>,
}

impl ConnectionHandle {
    /// Connect to a server, perform the geometry handshake, and spawn the
    /// actor task.
    pub async fn connect(addr: impl Into<String>) -> Result<Self, ClientError> {
        let addr = addr.into();
        let (sink, stream, geometry) = establish(&addr).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (push_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let actor = ConnectionActor {
            addr,
            geometry,
            push_tx: push_tx.clone(),
            status_tx: status_tx.clone(),
            pending: HashMap::new(),
            next_seq: 0,
            last_range: None,
        };
        tokio::spawn(actor.run(sink, stream, rx));

        Ok(Self { tx, geometry, push_tx, status_tx })
    }

}

#[async_trait::async_trait]
impl ChunkTransport for ConnectionHandle {
    fn geometry(&self) -> TileGeometry {
        self.geometry
    }

    fn set_range(&self, range: ChunkRect) -> Result<(), ClientError> {
        self.tx
            .send(Command::SetRange(range))
            .map_err(|_| ClientError::Shutdown)
    }

    async fn read_chunk(&self, coord: ChunkCoord) -> Result<Vec<u8>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Read { coord, reply })
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    async fn write_chunk(
        &self,
        coord: ChunkCoord,
        data: Vec<u8>,
        mode: BlendMode,
    ) -> Result<Vec<u8>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Write { coord, data, mode, reply })
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    fn subscribe_chunks(&self) -> broadcast::Receiver<RemoteChunk> {
        self.push_tx.subscribe()
    }

    fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }
}

/// Dial the server and read the `Hello` handshake.
async fn establish(addr: &str) -> Result<(FrameSink, FrameStream, TileGeometry), ClientError> {
    let stream = TcpStream::connect(addr).await.map_err(ClientError::Connect)?;
    let _ = stream.set_nodelay(true);

    let codec_cfg = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec();
    let (sink, mut stream) = Framed::new(stream, codec_cfg).split();

    let frame = tokio::time::timeout(HELLO_TIMEOUT, stream.next())
        .await
        .map_err(|_| ClientError::Protocol("no handshake from server".into()))?
        .ok_or_else(|| ClientError::Protocol("connection closed during handshake".into()))?
        .map_err(|e| ClientError::Protocol(format!("handshake read failed: {e}")))?;

    match codec::decode::<ServerMsg>(&frame) {
        Ok(ServerMsg::Hello { tile_size }) => Ok((sink, stream, TileGeometry::new(tile_size))),
        Ok(other) => Err(ClientError::Protocol(format!(
            "expected hello, got {other:?}"
        ))),
        Err(e) => Err(ClientError::Protocol(format!("undecodable handshake: {e}"))),
    }
}

struct ConnectionActor {
    addr: String,
    geometry: TileGeometry,
    push_tx: broadcast::Sender<RemoteChunk>,
    status_tx: broadcast::Sender<ConnectionStatus>,
    pending: HashMap<u64, Reply>,
    next_seq: u64,
    last_range: Option<ChunkRect>,
}

impl ConnectionActor {
    /// Run until every handle is dropped.
    async fn run(
        mut self,
        mut sink: FrameSink,
        mut stream: FrameStream,
        mut rx: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            let alive = self.serve(&mut sink, &mut stream, &mut rx).await;
            self.fail_pending();
            let _ = self.status_tx.send(ConnectionStatus::Disconnected);
            if !alive {
                debug!("connection actor shutting down: handles dropped");
                return;
            }
            match self.reconnect(&mut rx).await {
                Some((new_sink, new_stream)) => {
                    sink = new_sink;
                    stream = new_stream;
                    let _ = self.status_tx.send(ConnectionStatus::Connected);
                }
                None => {
                    debug!("connection actor shutting down during reconnect");
                    return;
                }
            }
        }
    }

    /// Serve one live connection. Returns false once the command channel
    /// is closed (all handles dropped).
    async fn serve(
        &mut self,
        sink: &mut FrameSink,
        stream: &mut FrameStream,
        rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> bool {
        let mut heartbeat = tokio::time::interval(PING_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => {
                        if !self.send_command(sink, cmd).await {
                            return true;
                        }
                    }
                    None => return false,
                },
                frame = stream.next() => match frame {
                    Some(Ok(buf)) => self.dispatch(&buf),
                    Some(Err(e)) => {
                        debug!(error = %e, "connection read error");
                        return true;
                    }
                    None => {
                        debug!("server closed the connection");
                        return true;
                    }
                },
                _ = heartbeat.tick() => {
                    if !self.send_msg(sink, &ClientMsg::Ping).await {
                        return true;
                    }
                }
            }
        }
    }

    /// Encode a command, register its reply slot, and put it on the wire.
    /// Returns false if the connection is gone.
    async fn send_command(&mut self, sink: &mut FrameSink, cmd: Command) -> bool {
        let msg = match cmd {
            Command::SetRange(range) => {
                self.last_range = Some(range);
                ClientMsg::SetRange {
                    x1: range.x1.to_string(),
                    y1: range.y1.to_string(),
                    x2: range.x2.to_string(),
                    y2: range.y2.to_string(),
                }
            }
            Command::Read { coord, reply } => {
                let seq = self.next_seq();
                self.pending.insert(seq, reply);
                let (x, y) = coord.to_wire();
                ClientMsg::ReadChunk { seq, x, y }
            }
            Command::Write { coord, data, mode, reply } => {
                let seq = self.next_seq();
                self.pending.insert(seq, reply);
                let (x, y) = coord.to_wire();
                ClientMsg::WriteChunk { seq, x, y, data, erase: mode.is_erase() }
            }
        };
        self.send_msg(sink, &msg).await
    }

    async fn send_msg(&mut self, sink: &mut FrameSink, msg: &ClientMsg) -> bool {
        let payload = match codec::encode(msg) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound message");
                return true;
            }
        };
        if let Err(e) = sink.send(Bytes::from(payload)).await {
            debug!(error = %e, "connection write error");
            return false;
        }
        true
    }

    fn dispatch(&mut self, buf: &[u8]) {
        let msg = match codec::decode::<ServerMsg>(buf) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "dropping undecodable frame");
                return;
            }
        };
        match msg {
            ServerMsg::ChunkData { seq, data } | ServerMsg::WriteAck { seq, data } => {
                if let Some(reply) = self.pending.remove(&seq) {
                    // A dropped receiver means the caller timed out and
                    // moved on; the response is simply stale.
                    let _ = reply.send(Ok(data));
                }
            }
            ServerMsg::WriteRejected { seq, message } => {
                if let Some(reply) = self.pending.remove(&seq) {
                    let _ = reply.send(Err(ClientError::Rejected(message)));
                }
            }
            ServerMsg::Chunk { x, y, data } => match ChunkCoord::parse(&x, &y) {
                Ok(coord) => {
                    let _ = self.push_tx.send(RemoteChunk {
                        coord,
                        data: std::sync::Arc::new(data),
                    });
                }
                Err(e) => warn!(error = %e, "push with malformed coordinate"),
            },
            ServerMsg::Hello { tile_size } => {
                if tile_size != self.geometry.tile_size() {
                    warn!(
                        announced = tile_size,
                        using = self.geometry.tile_size(),
                        "server changed tile geometry mid-session"
                    );
                }
            }
            ServerMsg::Pong => trace!("pong"),
        }
    }

    /// Keep dialing until the server is back. Commands arriving meanwhile
    /// fail fast so callers can apply their own retry policy. Returns
    /// `None` once every handle is dropped.
    async fn reconnect(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Option<(FrameSink, FrameStream)> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let _ = self.status_tx.send(ConnectionStatus::Reconnecting { attempt });
            match establish(&self.addr).await {
                Ok((mut sink, stream, geometry)) => {
                    if geometry != self.geometry {
                        warn!(
                            announced = geometry.tile_size(),
                            using = self.geometry.tile_size(),
                            "server geometry changed across reconnect"
                        );
                    }
                    // Restore the subscription before anyone hears
                    // `Connected`, so no visible chunk is missed.
                    if let Some(range) = self.last_range {
                        self.send_command(&mut sink, Command::SetRange(range)).await;
                    }
                    info!(addr = %self.addr, attempt, "reconnected");
                    return Some((sink, stream));
                }
                Err(e) => {
                    debug!(addr = %self.addr, attempt, error = %e, "reconnect failed");
                }
            }

            // Back off, failing commands fast while we wait.
            let wait = tokio::time::sleep(RECONNECT_DELAY);
            tokio::pin!(wait);
            loop {
                tokio::select! {
                    _ = &mut wait => break,
                    cmd = rx.recv() => match cmd {
                        Some(Command::SetRange(range)) => self.last_range = Some(range),
                        Some(Command::Read { reply, .. }) | Some(Command::Write { reply, .. }) => {
                            let _ = reply.send(Err(ClientError::Disconnected));
                        }
                        None => return None,
                    },
                }
            }
        }
    }

    fn fail_pending(&mut self) {
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(ClientError::Disconnected));
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}
